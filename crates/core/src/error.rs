use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("fetch of {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("source unreachable {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),

    #[error("document has no content: {0}")]
    Empty(String),
}

impl LoadError {
    /// Transient failures worth another fetch attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LoadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            LoadError::Unreachable { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm provider {provider} returned {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("llm response had no content")]
    EmptyResponse,

    #[error("missing api key for llm provider {0}")]
    MissingApiKey(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction produced no content for {0}")]
    NoContent(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider {provider} returned {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("missing api key for embedding provider {0}")]
    MissingApiKey(String),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            EmbeddingError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached. Callers decide whether to retry.
    #[error("store unavailable at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("store query failed: {0}")]
    Query(String),

    #[error("vector dimension mismatch on index {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("query is too long: {len} characters (max {max})")]
    QueryTooLong { len: usize, max: usize },

    #[error("top_k must be between {min} and {max}, got {value}")]
    TopKOutOfRange { value: usize, min: usize, max: usize },

    #[error("similarity threshold must be between 0 and 1, got {0}")]
    ThresholdOutOfRange(f32),

    #[error("unknown document type: {0}")]
    UnknownDocType(String),

    #[error("{0} must not be empty when provided")]
    EmptyFilter(&'static str),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store search failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single document inside an ingestion pass.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("document produced no chunks: {0}")]
    NoChunks(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("document timed out after {0}s")]
    Timeout(u64),
}

impl IngestError {
    pub fn error_type(&self) -> &'static str {
        match self {
            IngestError::Load(_) => "LoadError",
            IngestError::NoChunks(_) => "ChunkingError",
            IngestError::Extraction(_) => "ExtractionError",
            IngestError::Embedding(_) => "EmbeddingError",
            IngestError::Store(StoreError::Connection { .. }) => "StoreConnectionError",
            IngestError::Store(_) => "StoreError",
            IngestError::Ledger(_) => "LedgerError",
            IngestError::Timeout(_) => "TimeoutError",
        }
    }
}

impl SearchError {
    pub fn error_type(&self) -> &'static str {
        match self {
            SearchError::Validation(_) => "ValidationError",
            SearchError::Embedding(_) => "EmbeddingError",
            SearchError::Store(StoreError::Connection { .. }) => "StoreConnectionError",
            SearchError::Store(_) => "SearchError",
        }
    }
}
