use crate::config::DEFAULT_EXCERPT_CHARS;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::index::VectorIndex;
use crate::models::{RetrievalResult, SourceRef};
use std::sync::Arc;
use tracing::debug;

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Retrieved hits rendered for the prompt. `sources[i]` cites the i-th
/// segment of `context`.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub hits: RetrievalResult,
    pub context: String,
    pub sources: Vec<SourceRef>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    excerpt_chars: usize,
}

impl Retriever {
    /// `index` must have been loaded with the same `embedder`.
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn retrieve(&self, query_text: &str, k: usize) -> Result<Retrieval, IndexError> {
        let vector = self.embedder.embed(query_text)?;
        let hits = self.index.query(&vector, k)?;
        debug!(
            k,
            returned = hits.len(),
            top_score = hits.first().map(|hit| hit.score).unwrap_or(0.0),
            "retrieved chunks"
        );

        let context = format_context(&hits);
        let sources = hits
            .iter()
            .map(|hit| SourceRef {
                source: hit.chunk.source.clone(),
                page: hit.chunk.page,
                excerpt: excerpt(&hit.chunk.text, self.excerpt_chars),
            })
            .collect();

        Ok(Retrieval {
            hits,
            context,
            sources,
        })
    }
}

pub fn format_context(hits: &RetrievalResult) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "[Source: {}, Page: {}]\n{}",
                hit.chunk.source, hit.chunk.page, hit.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
