use crate::error::StoreError;
use crate::models::{DocType, EmbeddedChunk, SearchResult};
use async_trait::async_trait;

/// Read side of the graph-vector store. One vector index per [`DocType`].
#[async_trait]
pub trait GraphVectorReader: Send + Sync {
    /// Nearest chunks of one type with `similarity_score >= min_score`,
    /// best first, at most `top_k`. Scores are `(1 + cosine) / 2`, the scale
    /// of Neo4j's cosine vector index.
    async fn search(
        &self,
        doc_type: DocType,
        embedding: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>, StoreError>;

    async fn count(&self, doc_type: DocType) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait GraphVectorWriter: Send + Sync {
    /// Creates labels, uniqueness constraints and vector indexes if missing.
    async fn ensure_schema(&self, dimensions: usize) -> Result<(), StoreError>;

    /// Idempotent on chunk id.
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<usize, StoreError>;

    /// Deletes chunks of `source_id` whose ids are not in `keep_ids`.
    async fn remove_stale(
        &self,
        doc_type: DocType,
        source_id: &str,
        keep_ids: &[String],
    ) -> Result<usize, StoreError>;
}
