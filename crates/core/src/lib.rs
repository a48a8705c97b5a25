pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod retriever;

pub use chunking::{chunk_pages, split_text, ChunkingConfig};
pub use config::{EmbeddingProviderKind, Settings, DEFAULT_EXCERPT_CHARS};
pub use embeddings::{
    create_embedder, CharacterNgramEmbedder, Embedder, OpenAiCompatibleEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IndexError, IngestError, QueryError, ServiceError};
pub use extractor::{extract, LopdfExtractor, PdfExtractor};
pub use index::{IndexStore, VectorIndex};
pub use ingest::{
    build_index, build_index_with, discover_pdf_files, ingest_folder_best_effort, BuildSummary,
    IngestionReport, SkippedPdf,
};
pub use llm::{AnthropicChatModel, ChatModel};
pub use models::{
    Answer, ChatMessage, Chunk, IndexEntry, IndexManifest, IndexStats, PageDocument, RetrievalHit,
    RetrievalResult, Role, SourceRef,
};
pub use pipeline::{ConversationPipeline, ConversationState, PipelineStep};
pub use retriever::{Retrieval, Retriever};
