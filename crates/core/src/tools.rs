use crate::config::Settings;
use crate::embeddings::EmbeddingService;
use crate::error::{ConfigError, ValidationError};
use crate::extraction::LanguageModel;
use crate::ingest::{IngestRequest, IngestionOrchestrator};
use crate::ledger::IngestionLedger;
use crate::models::DocType;
use crate::search::{SearchEngine, SearchRequest};
use crate::traits::{GraphVectorReader, GraphVectorWriter};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const INGEST_TOOL: &str = "ingest_terraform_docs";
pub const SEARCH_TOOL: &str = "terraform_doc_search";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMetadata {
    pub timestamp: String,
    pub tool_name: String,
    pub execution_id: String,
    pub version: String,
}

impl ToolMetadata {
    fn new(tool_name: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            tool_name: tool_name.to_string(),
            execution_id: format!("{tool_name}_{}", Uuid::new_v4()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub success: bool,
    pub data: Value,
    pub metadata: ToolMetadata,
}

impl ToolResponse {
    pub fn ok(tool_name: &str, data: Value) -> Self {
        Self {
            success: true,
            data,
            metadata: ToolMetadata::new(tool_name),
        }
    }

    pub fn failure(tool_name: &str, error: impl ToString, error_type: &str) -> Self {
        Self {
            success: false,
            data: json!({ "error": error.to_string(), "error_type": error_type }),
            metadata: ToolMetadata::new(tool_name),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IngestInput {
    pub filter_types: Vec<String>,
    #[serde(default)]
    pub filter_services: Option<Vec<String>>,
    #[serde(default)]
    pub scan_dirs: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SearchInput {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub node_types: Option<Vec<String>>,
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.7
}

/// Resolves type names and their aliases, in order, without duplicates.
///
/// `datasource` is `data_source`; `terraform` is `resource` and `data_source`.
pub fn resolve_doc_types(names: &[String]) -> Result<Vec<DocType>, ValidationError> {
    let mut resolved = Vec::new();
    for name in names {
        let expanded = match name.trim().to_ascii_lowercase().as_str() {
            "terraform" => vec![DocType::Resource, DocType::DataSource],
            "datasource" => vec![DocType::DataSource],
            other => vec![other.parse::<DocType>()?],
        };
        for doc_type in expanded {
            if !resolved.contains(&doc_type) {
                resolved.push(doc_type);
            }
        }
    }
    Ok(resolved)
}

fn ingest_request(input: IngestInput) -> Result<IngestRequest, ValidationError> {
    let filter_types = resolve_doc_types(&input.filter_types)?;
    if filter_types.is_empty() {
        return Err(ValidationError::EmptyFilter("filter_types"));
    }
    let filter_services = match input.filter_services {
        Some(services) => {
            let services: Vec<String> = services
                .into_iter()
                .map(|service| service.trim().to_string())
                .filter(|service| !service.is_empty())
                .collect();
            if services.is_empty() {
                return Err(ValidationError::EmptyFilter("filter_services"));
            }
            Some(services)
        }
        None => None,
    };

    Ok(IngestRequest {
        filter_types: filter_types.into_iter().collect::<BTreeSet<_>>(),
        filter_services,
        scan_dirs: input.scan_dirs,
        force: input.force,
    })
}

fn search_request(input: &SearchInput) -> Result<SearchRequest, ValidationError> {
    let node_types = input
        .node_types
        .as_deref()
        .map(resolve_doc_types)
        .transpose()?;
    SearchRequest::new(&input.query, input.top_k, input.similarity_threshold, node_types)
}

pub struct TerraformDocTools<S> {
    orchestrator: IngestionOrchestrator<S>,
    search: SearchEngine<S>,
    configuration: Value,
}

impl<S> TerraformDocTools<S>
where
    S: GraphVectorReader + GraphVectorWriter,
{
    pub fn new(
        settings: &Settings,
        store: Arc<S>,
        embeddings: Arc<EmbeddingService>,
        model: Option<Arc<dyn LanguageModel>>,
        ledger: Arc<IngestionLedger>,
    ) -> Result<Self, ConfigError> {
        let configuration = json!({
            "embedding_provider": embeddings.provider_name(),
            "embedding_model": embeddings.model(),
            "embedding_dimensions": embeddings.dimensions(),
            "llm_model": model.as_ref().map(|model| model.model().to_string()),
            "store_url": settings.store.url,
            "index_path": settings.ingestion.index_path,
            "scan_dirs": settings.ingestion.scan_dirs,
            "llm_doc_types": settings.ingestion.llm_doc_types,
            "chunk_size": settings.chunking.chunk_size,
            "chunk_overlap": settings.chunking.chunk_overlap,
        });

        Ok(Self {
            orchestrator: IngestionOrchestrator::new(
                settings,
                store.clone(),
                embeddings.clone(),
                model,
                ledger,
            )?,
            search: SearchEngine::new(store, embeddings),
            configuration,
        })
    }

    /// Dispatches a tool call by name with raw JSON arguments.
    pub async fn call(&self, tool_name: &str, arguments: Value) -> ToolResponse {
        match tool_name {
            INGEST_TOOL => match serde_json::from_value(arguments) {
                Ok(input) => self.ingest_terraform_docs(input).await,
                Err(error) => ToolResponse::failure(INGEST_TOOL, error, "ValidationError"),
            },
            SEARCH_TOOL => match serde_json::from_value(arguments) {
                Ok(input) => self.terraform_doc_search(input).await,
                Err(error) => ToolResponse::failure(SEARCH_TOOL, error, "ValidationError"),
            },
            other => ToolResponse::failure(other, format!("unknown tool: {other}"), "ValidationError"),
        }
    }

    pub async fn ingest_terraform_docs(&self, input: IngestInput) -> ToolResponse {
        let request = match ingest_request(input) {
            Ok(request) => request,
            Err(error) => {
                warn!(tool = INGEST_TOOL, error = %error, "rejected input");
                return ToolResponse::failure(INGEST_TOOL, error, "ValidationError");
            }
        };

        let report = self.orchestrator.ingest(&request).await;
        info!(
            tool = INGEST_TOOL,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "ingestion tool finished"
        );

        ToolResponse::ok(
            INGEST_TOOL,
            json!({
                "operation_type": "automatic",
                "results": report.outcomes,
                "metrics": {
                    "discovered": report.discovered,
                    "succeeded": report.succeeded,
                    "failed": report.failed,
                    "skipped": report.skipped,
                    "chunks": report.chunks_written,
                    "processing_time_seconds": report.processing_time_seconds,
                },
                "discovery_errors": report.discovery_errors,
                "configuration": self.configuration,
            }),
        )
    }

    pub async fn terraform_doc_search(&self, input: SearchInput) -> ToolResponse {
        let request = match search_request(&input) {
            Ok(request) => request,
            Err(error) => {
                warn!(tool = SEARCH_TOOL, error = %error, "rejected input");
                return ToolResponse::failure(SEARCH_TOOL, error, "ValidationError");
            }
        };

        match self.search.search(&request).await {
            Ok(results) => {
                let embeddings = self.search.embeddings();
                ToolResponse::ok(
                    SEARCH_TOOL,
                    json!({
                        "query": request.query(),
                        "results_count": results.len(),
                        "results": results,
                        "search_parameters": {
                            "top_k": request.top_k(),
                            "similarity_threshold": request.min_score(),
                            "node_types": request.doc_types(),
                        },
                        "service_info": {
                            "provider": embeddings.provider_name(),
                            "model": embeddings.model(),
                            "dimensions": embeddings.dimensions(),
                            "index_names": request
                                .doc_types()
                                .iter()
                                .map(DocType::index_name)
                                .collect::<Vec<_>>(),
                        },
                    }),
                )
            }
            Err(error) => {
                warn!(tool = SEARCH_TOOL, error = %error, "search failed");
                ToolResponse::failure(SEARCH_TOOL, &error, error.error_type())
            }
        }
    }
}
