use crate::chunking::{Chunker, ChunkingConfig};
use crate::config::Settings;
use crate::discovery::{filter_sources, SourceDiscovery};
use crate::embeddings::EmbeddingService;
use crate::error::{ConfigError, IngestError};
use crate::extraction::{ExtractionPipeline, LanguageModel};
use crate::ledger::IngestionLedger;
use crate::loader::DocumentLoader;
use crate::models::{DocType, DocumentSource, EmbeddedChunk, LedgerEntry, LedgerStatus};
use crate::traits::GraphVectorWriter;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestRequest {
    pub filter_types: BTreeSet<DocType>,
    /// `None` keeps every service.
    pub filter_services: Option<Vec<String>>,
    /// `None` uses the configured scan directories.
    pub scan_dirs: Option<Vec<PathBuf>>,
    /// Re-ingest sources the ledger already marks as done.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentOutcome {
    pub identity: String,
    pub source: String,
    pub doc_type: DocType,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub chunks_created: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub chunks_written: usize,
    pub outcomes: Vec<DocumentOutcome>,
    pub discovery_errors: Vec<String>,
    pub processing_time_seconds: f64,
}

impl IngestionReport {
    fn push(&mut self, outcome: DocumentOutcome) {
        match outcome.status {
            DocumentStatus::Succeeded => {
                self.succeeded += 1;
                self.chunks_written += outcome.chunks_created;
            }
            DocumentStatus::Failed => self.failed += 1,
            DocumentStatus::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Drives discovery, load, chunk or extract, embed and store per document.
pub struct IngestionOrchestrator<W> {
    store: Arc<W>,
    discovery: SourceDiscovery,
    loader: DocumentLoader,
    chunker: Chunker,
    extractor: ExtractionPipeline,
    embeddings: Arc<EmbeddingService>,
    ledger: Arc<IngestionLedger>,
    llm_doc_types: Vec<DocType>,
    scan_dirs: Vec<PathBuf>,
    document_timeout: Duration,
    schema_ready: OnceCell<()>,
}

impl<W: GraphVectorWriter> IngestionOrchestrator<W> {
    pub fn new(
        settings: &Settings,
        store: Arc<W>,
        embeddings: Arc<EmbeddingService>,
        model: Option<Arc<dyn LanguageModel>>,
        ledger: Arc<IngestionLedger>,
    ) -> Result<Self, ConfigError> {
        let chunking = ChunkingConfig::from(settings.chunking);
        Ok(Self {
            store,
            discovery: SourceDiscovery::new(&settings.ingestion)?,
            loader: DocumentLoader::new(settings)?,
            chunker: Chunker::new(chunking)?,
            extractor: ExtractionPipeline::from_settings(model, chunking, &settings.llm),
            embeddings,
            ledger,
            llm_doc_types: settings.ingestion.llm_doc_types.clone(),
            scan_dirs: settings.ingestion.scan_dirs.clone(),
            document_timeout: settings.ingestion.document_timeout(),
            schema_ready: OnceCell::new(),
        })
    }

    pub async fn ingest(&self, request: &IngestRequest) -> IngestionReport {
        let started = Instant::now();
        let scan_dirs = request.scan_dirs.as_deref().unwrap_or(&self.scan_dirs);
        let discovered = self.discovery.discover(&request.filter_types, scan_dirs);
        let sources = filter_sources(
            discovered.sources,
            &request.filter_types,
            request.filter_services.as_deref(),
        );

        info!(
            types = ?request.filter_types,
            services = ?request.filter_services,
            sources = sources.len(),
            "ingestion pass starting"
        );

        let mut report = self.ingest_sources(sources, request.force).await;
        report.discovery_errors = discovered.errors;
        report.processing_time_seconds = started.elapsed().as_secs_f64();
        report
    }

    /// Runs the per-document pipeline over already discovered sources.
    pub async fn ingest_sources(&self, sources: Vec<DocumentSource>, force: bool) -> IngestionReport {
        let started = Instant::now();
        let mut report = IngestionReport {
            discovered: sources.len(),
            ..IngestionReport::default()
        };

        for source in &sources {
            let identity = source.identity();
            if !force && self.ledger.is_ingested(&identity).await {
                debug!(source = %source.uri, "already ingested, skipping");
                report.push(outcome(source, DocumentStatus::Skipped, 0, None));
                continue;
            }

            let result = match tokio::time::timeout(self.document_timeout, self.ingest_document(source)).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::Timeout(self.document_timeout.as_secs())),
            };

            match result {
                Ok(chunks) => {
                    info!(source = %source.uri, doc_type = %source.doc_type, chunks, "document ingested");
                    report.push(outcome(source, DocumentStatus::Succeeded, chunks, None));
                }
                Err(error) => {
                    warn!(
                        source = %source.uri,
                        identity = %identity,
                        error_type = error.error_type(),
                        error = %error,
                        "document failed"
                    );
                    report.push(outcome(source, DocumentStatus::Failed, 0, Some(&error)));
                }
            }
        }

        report.processing_time_seconds = started.elapsed().as_secs_f64();
        info!(
            discovered = report.discovered,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            chunks = report.chunks_written,
            "ingestion pass finished"
        );
        report
    }

    async fn ingest_document(&self, source: &DocumentSource) -> Result<usize, IngestError> {
        let document = self.loader.load(source).await?;

        let chunks = if self.llm_doc_types.contains(&source.doc_type) {
            self.extractor.extract(&document, source).await?
        } else {
            self.chunker.chunk(&document, source)
        };
        if chunks.is_empty() {
            return Err(IngestError::NoChunks(source.uri.clone()));
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;
        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();

        self.schema_ready
            .get_or_try_init(|| self.store.ensure_schema(self.embeddings.dimensions()))
            .await?;

        let written = self.store.upsert(&embedded).await?;
        let keep_ids: Vec<String> = embedded.iter().map(|item| item.chunk.id.clone()).collect();
        let removed = self
            .store
            .remove_stale(source.doc_type, &source.identity(), &keep_ids)
            .await?;
        if removed > 0 {
            debug!(source = %source.uri, removed, "removed stale chunks");
        }

        self.ledger
            .record(LedgerEntry::new(source, LedgerStatus::Succeeded, written))
            .await?;
        Ok(written)
    }
}

fn outcome(
    source: &DocumentSource,
    status: DocumentStatus,
    chunks_created: usize,
    error: Option<&IngestError>,
) -> DocumentOutcome {
    DocumentOutcome {
        identity: source.identity(),
        source: source.uri.clone(),
        doc_type: source.doc_type,
        status,
        error: error.map(ToString::to_string),
        error_type: error.map(|error| error.error_type().to_string()),
        chunks_created,
    }
}
