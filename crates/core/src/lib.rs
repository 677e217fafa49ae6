pub mod chunking;
pub mod config;
pub mod discovery;
pub mod embeddings;
pub mod error;
pub mod extraction;
pub mod ingest;
pub mod ledger;
pub mod loader;
pub mod models;
pub mod search;
pub mod stores;
pub mod tools;
pub mod traits;

pub use chunking::{split_recursive, Chunker, ChunkingConfig};
pub use config::Settings;
pub use discovery::{filter_sources, DiscoveryOutcome, SourceDiscovery};
pub use embeddings::{
    cosine_similarity, create_embedding_provider, EmbeddingProvider, EmbeddingService,
    HashingEmbedder, OpenAiEmbedder,
};
pub use error::{
    ConfigError, EmbeddingError, ExtractionError, IngestError, LedgerError, LlmError, LoadError,
    SearchError, StoreError, ValidationError,
};
pub use extraction::{
    create_language_model, ExtractionPipeline, LanguageModel, OpenAiChatModel, PIPELINE_VERSION,
};
pub use ingest::{DocumentOutcome, DocumentStatus, IngestRequest, IngestionOrchestrator, IngestionReport};
pub use ledger::IngestionLedger;
pub use loader::DocumentLoader;
pub use models::{
    Chunk, ChunkType, DocFormat, DocType, DocumentSource, EmbeddedChunk, LedgerEntry,
    LedgerStatus, RawDocument, SearchResult, StructuralHint,
};
pub use search::{SearchEngine, SearchRequest};
pub use stores::{InMemoryStore, Neo4jStore};
pub use tools::{TerraformDocTools, ToolResponse, INGEST_TOOL, SEARCH_TOOL};
pub use traits::{GraphVectorReader, GraphVectorWriter};
