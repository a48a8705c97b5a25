use crate::chunking::ChunkingConfig;
use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 6;

/// Characters of chunk text kept in each citation excerpt.
pub const DEFAULT_EXCERPT_CHARS: usize = 100;

pub const DEFAULT_CHAT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_CHAT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProviderKind {
    /// Hashed character trigrams computed in-process.
    CharNgram,
    /// Any endpoint speaking the OpenAI `/embeddings` protocol.
    OpenAiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub index_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub excerpt_chars: usize,
    pub embedding_provider: EmbeddingProviderKind,
    /// Remote model name; ignored by the in-process provider.
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_endpoint: String,
    pub chat_model: String,
    pub chat_endpoint: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("regdoc_index"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            embedding_provider: EmbeddingProviderKind::CharNgram,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            embedding_endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            chat_endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            temperature: 0.1,
            max_tokens: 2_048,
            request_timeout_secs: 60,
        }
    }
}

impl Settings {
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }

    /// Checks every tunable before any file is touched.
    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking().validate()?;

        if self.top_k == 0 {
            return Err(IngestError::InvalidConfig(
                "top_k must be at least 1".to_string(),
            ));
        }
        if self.excerpt_chars == 0 {
            return Err(IngestError::InvalidConfig(
                "excerpt_chars must be at least 1".to_string(),
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding_dimensions must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.top_k, 6);
        assert_eq!(settings.chunking().chunk_size, 1_000);
        assert_eq!(settings.chunking().overlap, 200);
    }

    #[test]
    fn overlap_not_below_chunk_size_is_rejected() {
        let settings = Settings {
            chunk_size: 200,
            chunk_overlap: 200,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(IngestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn settings_round_trip_through_json() -> Result<(), Box<dyn std::error::Error>> {
        let settings = Settings::default();
        let encoded = serde_json::to_string(&settings)?;
        assert!(encoded.contains("\"char-ngram\""));
        let decoded: Settings = serde_json::from_str(&encoded)?;
        assert_eq!(decoded.chat_model, settings.chat_model);
        Ok(())
    }
}
