use crate::embeddings::EmbeddingService;
use crate::error::{SearchError, ValidationError};
use crate::models::{DocType, SearchResult};
use crate::traits::GraphVectorReader;
use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub const MAX_QUERY_CHARS: usize = 1000;
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 50;

/// A validated search. Construction rejects bad input before any I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    query: String,
    top_k: usize,
    min_score: f32,
    doc_types: Vec<DocType>,
}

impl SearchRequest {
    /// `doc_types = None` searches every type.
    pub fn new(
        query: &str,
        top_k: usize,
        min_score: f32,
        doc_types: Option<Vec<DocType>>,
    ) -> Result<Self, ValidationError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let len = query.chars().count();
        if len > MAX_QUERY_CHARS {
            return Err(ValidationError::QueryTooLong {
                len,
                max: MAX_QUERY_CHARS,
            });
        }
        if !(MIN_TOP_K..=MAX_TOP_K).contains(&top_k) {
            return Err(ValidationError::TopKOutOfRange {
                value: top_k,
                min: MIN_TOP_K,
                max: MAX_TOP_K,
            });
        }
        if !(0.0..=1.0).contains(&min_score) {
            return Err(ValidationError::ThresholdOutOfRange(min_score));
        }

        let doc_types = match doc_types {
            None => DocType::ALL.to_vec(),
            Some(types) if types.is_empty() => return Err(ValidationError::EmptyFilter("node_types")),
            Some(types) => types
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };

        Ok(Self {
            query: query.to_string(),
            top_k,
            min_score,
            doc_types,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    pub fn doc_types(&self) -> &[DocType] {
        &self.doc_types
    }

    /// Slots each type gets before the global re-rank.
    pub fn per_type_limit(&self) -> usize {
        (self.top_k / self.doc_types.len().max(1)).max(1)
    }
}

pub struct SearchEngine<R> {
    store: Arc<R>,
    embeddings: Arc<EmbeddingService>,
}

impl<R: GraphVectorReader> SearchEngine<R> {
    pub fn new(store: Arc<R>, embeddings: Arc<EmbeddingService>) -> Self {
        Self { store, embeddings }
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        let embedding = self.embeddings.embed_query(request.query()).await?;
        let limit = request.per_type_limit();

        let per_type = try_join_all(request.doc_types().iter().map(|doc_type| {
            self.store
                .search(*doc_type, &embedding, limit, request.min_score())
        }))
        .await?;

        let mut results = merge_ranked(per_type, request.top_k());
        results.retain(|result| result.similarity_score >= request.min_score());

        debug!(
            query = request.query(),
            types = request.doc_types().len(),
            per_type = limit,
            results = results.len(),
            "search finished"
        );
        Ok(results)
    }
}

/// Union of per-type lists, best first, cut to `top_k`.
pub fn merge_ranked(per_type: Vec<Vec<SearchResult>>, top_k: usize) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = per_type.into_iter().flatten().collect();
    merged.sort_by(|left, right| right.similarity_score.total_cmp(&left.similarity_score));
    merged.truncate(top_k);
    merged
}
