use crate::config::{EmbeddingProviderKind, Settings};
use crate::error::ServiceError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

const EMBEDDING_BATCH_SIZE: usize = 64;

/// Text to vector capability. Implementations must be deterministic for a
/// given `model_id`; the index persists that id and refuses to mix models.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> String;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> String {
        format!("char-trigram-v1/{}", self.dimensions.max(1))
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

/// Blocking client for endpoints that speak the OpenAI `/embeddings` protocol.
pub struct OpenAiCompatibleEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(ServiceError::InvalidConfig(
                "embedding model name is empty".to_string(),
            ));
        }

        let endpoint = Url::parse(&format!("{}/embeddings", base_url.trim_end_matches('/')))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    fn request_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let payload = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.trim());
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ServiceError::Status {
                service: "embeddings".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = response.json()?;
        if parsed.data.len() != texts.len() {
            return Err(ServiceError::EmptyResponse(format!(
                "embeddings endpoint ({} of {} vectors)",
                parsed.data.len(),
                texts.len()
            )));
        }
        parsed.data.sort_by_key(|datum| datum.index);

        Ok(parsed.data.into_iter().map(|datum| datum.embedding).collect())
    }
}

impl Embedder for OpenAiCompatibleEmbedder {
    fn model_id(&self) -> String {
        format!("openai-compatible:{}/{}", self.model, self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| ServiceError::EmptyResponse("embeddings endpoint".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            let embedded = run_blocking(|| self.request_batch(batch))?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

/// Runs blocking HTTP work from any calling context. Multi-thread runtime
/// workers use `block_in_place`; other runtime flavors run the work on a
/// scoped OS thread, as `block_in_place` is unavailable there.
fn run_blocking<T: Send>(work: impl FnOnce() -> T + Send) -> T {
    let Ok(handle) = Handle::try_current() else {
        return work();
    };

    match handle.runtime_flavor() {
        RuntimeFlavor::MultiThread => tokio::task::block_in_place(work),
        _ => thread::scope(|scope| {
            scope
                .spawn(work)
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        }),
    }
}

pub fn create_embedder(
    settings: &Settings,
    api_key: Option<String>,
) -> Result<Arc<dyn Embedder>, ServiceError> {
    match settings.embedding_provider {
        EmbeddingProviderKind::CharNgram => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: settings.embedding_dimensions,
        })),
        EmbeddingProviderKind::OpenAiCompatible => Ok(Arc::new(OpenAiCompatibleEmbedder::new(
            &settings.embedding_endpoint,
            settings.embedding_model.clone(),
            settings.embedding_dimensions,
            api_key,
            Duration::from_secs(settings.request_timeout_secs),
        )?)),
    }
}
