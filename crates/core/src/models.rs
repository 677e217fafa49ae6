use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Category of a document; each one owns a dedicated vector index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Resource,
    DataSource,
    BestPractice,
    Readme,
}

impl DocType {
    pub const ALL: [DocType; 4] = [
        DocType::Resource,
        DocType::DataSource,
        DocType::BestPractice,
        DocType::Readme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Resource => "resource",
            DocType::DataSource => "data_source",
            DocType::BestPractice => "best_practice",
            DocType::Readme => "readme",
        }
    }

    /// Node label used for chunks of this type.
    pub fn label(&self) -> &'static str {
        match self {
            DocType::Resource => "DocChunk_Resource",
            DocType::DataSource => "DocChunk_DataSource",
            DocType::BestPractice => "DocChunk_BestPractice",
            DocType::Readme => "DocChunk_Readme",
        }
    }

    pub fn index_name(&self) -> &'static str {
        match self {
            DocType::Resource => "docchunk_resource_embedding_hnsw",
            DocType::DataSource => "docchunk_datasource_embedding_hnsw",
            DocType::BestPractice => "docchunk_bestpractice_embedding_hnsw",
            DocType::Readme => "docchunk_readme_embedding_hnsw",
        }
    }

    /// Resource and data source pages are split along their documented sections.
    pub fn is_structured(&self) -> bool {
        matches!(self, DocType::Resource | DocType::DataSource)
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resource" => Ok(DocType::Resource),
            "data_source" => Ok(DocType::DataSource),
            "best_practice" => Ok(DocType::BestPractice),
            "readme" => Ok(DocType::Readme),
            other => Err(ValidationError::UnknownDocType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocFormat {
    Html,
    Markdown,
    Pdf,
}

impl DocFormat {
    pub fn detect(uri: &str) -> Option<Self> {
        let lowered = uri
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        if lowered.ends_with(".md") || lowered.ends_with(".markdown") {
            Some(DocFormat::Markdown)
        } else if lowered.ends_with(".html") || lowered.ends_with(".htm") {
            Some(DocFormat::Html)
        } else if lowered.ends_with(".pdf") {
            Some(DocFormat::Pdf)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocFormat::Html => "html",
            DocFormat::Markdown => "markdown",
            DocFormat::Pdf => "pdf",
        }
    }
}

/// A discovered unit of ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSource {
    pub uri: String,
    pub format: DocFormat,
    pub doc_type: DocType,
    pub provider: String,
    pub service: Option<String>,
    pub name: String,
}

impl DocumentSource {
    /// Stable identity of the source, independent of where the file lives.
    pub fn identity(&self) -> String {
        stable_hash(&[
            &self.provider,
            self.service.as_deref().unwrap_or_default(),
            &self.name,
            self.doc_type.as_str(),
        ])
    }

    pub fn is_remote(&self) -> bool {
        url::Url::parse(&self.uri)
            .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    pub fn matches_services(&self, services: &[String]) -> bool {
        match &self.service {
            Some(service) => services
                .iter()
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(service.trim())),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructuralHint {
    /// Byte offset of the heading line in the document text.
    Heading {
        level: u8,
        title: String,
        offset: usize,
    },
    Page {
        number: u32,
        offset: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RawDocument {
    pub text: String,
    pub hints: Vec<StructuralHint>,
    pub front_matter: BTreeMap<String, String>,
}

impl RawDocument {
    pub fn title(&self) -> Option<&str> {
        self.hints.iter().find_map(|hint| match hint {
            StructuralHint::Heading { level: 1, title, .. } => Some(title.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Overview,
    Arguments,
    Attributes,
    Examples,
    Notes,
    Content,
    BestPractices,
    Security,
    Compliance,
    Pitfalls,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Overview => "overview",
            ChunkType::Arguments => "arguments",
            ChunkType::Attributes => "attributes",
            ChunkType::Examples => "examples",
            ChunkType::Notes => "notes",
            ChunkType::Content => "content",
            ChunkType::BestPractices => "best_practices",
            ChunkType::Security => "security",
            ChunkType::Compliance => "compliance",
            ChunkType::Pitfalls => "pitfalls",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub doc_type: DocType,
    pub provider: String,
    pub service: Option<String>,
    pub name: String,
    pub chunk_type: ChunkType,
    /// Identity of the source document the chunk was cut from.
    pub source_id: String,
    pub source_metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn from_source(
        source: &DocumentSource,
        chunk_type: ChunkType,
        ordinal: usize,
        content: String,
    ) -> Self {
        let id = stable_hash(&[
            &source.provider,
            source.service.as_deref().unwrap_or_default(),
            &source.name,
            source.doc_type.as_str(),
            chunk_type.as_str(),
            &ordinal.to_string(),
        ]);

        let mut source_metadata = BTreeMap::new();
        source_metadata.insert("source_uri".to_string(), source.uri.clone());
        source_metadata.insert("format".to_string(), source.format.as_str().to_string());
        source_metadata.insert("chunk_index".to_string(), ordinal.to_string());

        Self {
            id,
            content,
            doc_type: source.doc_type,
            provider: source.provider.clone(),
            service: source.service.clone(),
            name: source.name.clone(),
            chunk_type,
            source_id: source.identity(),
            source_metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.source_metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    pub similarity_score: f32,
    pub node_type: DocType,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Succeeded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub identity: String,
    pub provider: String,
    pub service: Option<String>,
    pub name: String,
    pub doc_type: DocType,
    pub source_uri: String,
    pub ingested_at: DateTime<Utc>,
    pub status: LedgerStatus,
    pub chunks: usize,
}

impl LedgerEntry {
    pub fn new(source: &DocumentSource, status: LedgerStatus, chunks: usize) -> Self {
        Self {
            identity: source.identity(),
            provider: source.provider.clone(),
            service: source.service.clone(),
            name: source.name.clone(),
            doc_type: source.doc_type,
            source_uri: source.uri.clone(),
            ingested_at: Utc::now(),
            status,
            chunks,
        }
    }
}

/// SHA-256 hex digest of `parts` joined with `|`.
pub fn stable_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
