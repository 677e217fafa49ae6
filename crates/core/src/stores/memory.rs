use crate::embeddings::cosine_similarity;
use crate::error::StoreError;
use crate::models::{DocType, EmbeddedChunk, SearchResult};
use crate::traits::{GraphVectorReader, GraphVectorWriter};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Index {
    dimensions: Option<usize>,
    nodes: BTreeMap<String, EmbeddedChunk>,
}

/// Brute-force cosine search over per-type maps. Used for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    indexes: RwLock<HashMap<DocType, Index>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn total(&self) -> usize {
        self.indexes
            .read()
            .await
            .values()
            .map(|index| index.nodes.len())
            .sum()
    }

    /// Stored chunks of one type, ordered by id.
    pub async fn chunks(&self, doc_type: DocType) -> Vec<EmbeddedChunk> {
        self.indexes
            .read()
            .await
            .get(&doc_type)
            .map(|index| index.nodes.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn check_dimensions(doc_type: DocType, expected: Option<usize>, actual: usize) -> Result<(), StoreError> {
    match expected {
        Some(expected) if expected != actual => Err(StoreError::DimensionMismatch {
            index: doc_type.index_name().to_string(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

/// Cosine mapped onto `[0, 1]`, matching Neo4j's cosine vector index.
fn normalized_score(cosine: f32) -> f32 {
    (1.0 + cosine) / 2.0
}

#[async_trait]
impl GraphVectorWriter for InMemoryStore {
    async fn ensure_schema(&self, dimensions: usize) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().await;
        for doc_type in DocType::ALL {
            let index = indexes.entry(doc_type).or_default();
            check_dimensions(doc_type, index.dimensions, dimensions)?;
            index.dimensions = Some(dimensions);
        }
        Ok(())
    }

    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<usize, StoreError> {
        let mut indexes = self.indexes.write().await;

        let mut batch: HashMap<DocType, usize> = HashMap::new();
        for embedded in chunks {
            let doc_type = embedded.chunk.doc_type;
            let expected = indexes
                .get(&doc_type)
                .and_then(|index| index.dimensions)
                .or_else(|| batch.get(&doc_type).copied());
            check_dimensions(doc_type, expected, embedded.embedding.len())?;
            batch.entry(doc_type).or_insert(embedded.embedding.len());
        }

        for embedded in chunks {
            let index = indexes.entry(embedded.chunk.doc_type).or_default();
            index.dimensions = Some(embedded.embedding.len());
            index
                .nodes
                .insert(embedded.chunk.id.clone(), embedded.clone());
        }
        Ok(chunks.len())
    }

    async fn remove_stale(
        &self,
        doc_type: DocType,
        source_id: &str,
        keep_ids: &[String],
    ) -> Result<usize, StoreError> {
        let mut indexes = self.indexes.write().await;
        let Some(index) = indexes.get_mut(&doc_type) else {
            return Ok(0);
        };
        let before = index.nodes.len();
        index.nodes.retain(|id, embedded| {
            embedded.chunk.source_id != source_id || keep_ids.contains(id)
        });
        Ok(before - index.nodes.len())
    }
}

#[async_trait]
impl GraphVectorReader for InMemoryStore {
    async fn search(
        &self,
        doc_type: DocType,
        embedding: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let indexes = self.indexes.read().await;
        let Some(index) = indexes.get(&doc_type) else {
            return Ok(Vec::new());
        };
        check_dimensions(doc_type, index.dimensions, embedding.len())?;

        let mut results: Vec<SearchResult> = index
            .nodes
            .values()
            .map(|embedded| {
                let cosine = cosine_similarity(&embedded.embedding, embedding);
                (embedded, normalized_score(cosine))
            })
            .filter(|(_, score)| *score >= min_score)
            .map(|(embedded, score)| {
                let chunk = &embedded.chunk;
                let mut metadata = chunk.source_metadata.clone();
                metadata.insert("provider".to_string(), chunk.provider.clone());
                if let Some(service) = &chunk.service {
                    metadata.insert("service".to_string(), service.clone());
                }
                metadata.insert("name".to_string(), chunk.name.clone());
                metadata.insert("chunk_type".to_string(), chunk.chunk_type.to_string());
                metadata.insert("source_id".to_string(), chunk.source_id.clone());
                SearchResult {
                    chunk_id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    similarity_score: score,
                    node_type: doc_type,
                    metadata,
                }
            })
            .collect();

        results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        results.truncate(top_k);
        Ok(results)
    }

    async fn count(&self, doc_type: DocType) -> Result<usize, StoreError> {
        Ok(self
            .indexes
            .read()
            .await
            .get(&doc_type)
            .map(|index| index.nodes.len())
            .unwrap_or_default())
    }
}
