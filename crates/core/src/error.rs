use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no pdf files found in {0}")]
    NoInput(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no index found at {0}; run `regdoc ingest` first")]
    NotFound(String),

    #[error("refusing to build an empty index: no chunks and no existing index")]
    EmptyBuild,

    #[error("index at {path} is incomplete or corrupt: {details}; rebuild with --reset")]
    Corrupt { path: String, details: String },

    #[error(
        "index was built with embedding model {indexed} but {configured} is configured; rebuild with --reset"
    )]
    EmbeddingMismatch { indexed: String, configured: String },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index is locked by {holder} (lock file {path}); delete the lock file if that process is gone")]
    Busy { path: String, holder: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("{0} returned no usable content")]
    EmptyResponse(String),

    #[error("invalid service config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Index(IndexError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<IndexError> for QueryError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::Service(service) => QueryError::Service(service),
            other => QueryError::Index(other),
        }
    }
}

impl QueryError {
    /// True when the caller should build the index before asking again.
    pub fn is_missing_index(&self) -> bool {
        matches!(self, QueryError::Index(IndexError::NotFound(_)))
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
