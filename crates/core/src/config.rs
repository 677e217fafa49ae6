use crate::error::ConfigError;
use crate::models::DocType;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DOCS_BASE_URL: &str =
    "https://raw.githubusercontent.com/hashicorp/terraform-provider-aws/main/website/docs";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub ingestion: IngestionSettings,
    #[serde(default)]
    pub ocr: OcrSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_neo4j")]
    pub database: String,
    #[serde(default = "default_neo4j")]
    pub username: String,
    #[serde(default = "default_store_password")]
    pub password: String,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_store_url() -> String {
    "http://localhost:7474".to_string()
}

fn default_neo4j() -> String {
    "neo4j".to_string()
}

fn default_store_password() -> String {
    "password".to_string()
}

fn default_store_timeout() -> u64 {
    30
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            database: default_neo4j(),
            username: default_neo4j(),
            password: default_store_password(),
            timeout_secs: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    OpenAi,
    /// Deterministic trigram hashing, no network.
    Hashing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::OpenAi
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_api_timeout() -> u64 {
    60
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_api_timeout(),
            api_base: default_api_base(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    OpenAi,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_provider")]
    pub provider: LlmProviderKind,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    /// Minimum spacing between two consecutive model calls.
    #[serde(default = "default_retry_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_llm_provider() -> LlmProviderKind {
    LlmProviderKind::OpenAi
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_confidence_threshold() -> f32 {
    0.7
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_api_timeout(),
            min_delay_ms: default_retry_delay_ms(),
            confidence_threshold: default_confidence_threshold(),
            api_base: default_api_base(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct ChunkingSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// A document added to discovery by hand.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtraDocument {
    pub path: String,
    pub doc_type: DocType,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSettings {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_docs_base_url")]
    pub docs_base_url: String,
    #[serde(default = "default_scan_dirs")]
    pub scan_dirs: Vec<PathBuf>,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,
    #[serde(default = "default_document_timeout")]
    pub document_timeout_secs: u64,
    #[serde(default = "default_llm_doc_types")]
    pub llm_doc_types: Vec<DocType>,
    #[serde(default)]
    pub extra_documents: Vec<ExtraDocument>,
}

fn default_provider() -> String {
    "aws".to_string()
}

fn default_index_path() -> PathBuf {
    PathBuf::from("docs/AWS_PROVIDER_RESOURCES.md")
}

fn default_docs_base_url() -> String {
    DEFAULT_DOCS_BASE_URL.to_string()
}

fn default_scan_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("docs/"),
        PathBuf::from("terraform_mcp_server/docs/"),
    ]
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("ingestion_ledger.jsonl")
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_document_timeout() -> u64 {
    300
}

fn default_llm_doc_types() -> Vec<DocType> {
    vec![DocType::BestPractice]
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            index_path: default_index_path(),
            docs_base_url: default_docs_base_url(),
            scan_dirs: default_scan_dirs(),
            ledger_path: default_ledger_path(),
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_retries: default_max_retries(),
            fetch_retry_delay_ms: default_retry_delay_ms(),
            document_timeout_secs: default_document_timeout(),
            llm_doc_types: default_llm_doc_types(),
            extra_documents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OcrSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Settings {
    /// Reads `path` when given, then applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup("NEO4J_URL") {
            self.store.url = value;
        }
        if let Some(value) = lookup("NEO4J_DATABASE") {
            self.store.database = value;
        }
        if let Some(value) = lookup("NEO4J_USER") {
            self.store.username = value;
        }
        if let Some(value) = lookup("NEO4J_PASSWORD") {
            self.store.password = value;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(key.clone());
            }
            if self.llm.api_key.is_none() {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(value) = lookup("LLM_OCR_ENDPOINT") {
            self.ocr.endpoint = Some(value.trim().to_string());
        }
        if let Some(value) = lookup("LLM_OCR_API_KEY") {
            self.ocr.api_key = Some(value.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunking.chunk_size must be > 0".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding.dimensions must be > 0".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.llm.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "llm.confidence_threshold must be in [0.0, 1.0]".to_string(),
            ));
        }
        if self.ingestion.provider.trim().is_empty() {
            return Err(ConfigError::Invalid("ingestion.provider must not be empty".to_string()));
        }
        Ok(())
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl IngestionSettings {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let settings: Settings = toml::from_str("")?;
        assert_eq!(settings.chunking.chunk_size, 1000);
        assert_eq!(settings.chunking.chunk_overlap, 200);
        assert_eq!(settings.embedding.batch_size, 100);
        assert_eq!(settings.embedding.dimensions, 1536);
        assert_eq!(settings.embedding.provider, EmbeddingProviderKind::OpenAi);
        assert_eq!(settings.llm.model, "gpt-4o");
        assert_eq!(settings.ingestion.llm_doc_types, vec![DocType::BestPractice]);
        assert_eq!(settings.ingestion.scan_dirs.len(), 2);
        settings.validate()?;
        Ok(())
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let settings: Settings = toml::from_str(
            r#"
            [embedding]
            provider = "hashing"
            dimensions = 64

            [ingestion]
            llm_doc_types = ["best_practice", "readme"]

            [[ingestion.extra_documents]]
            path = "docs/aws_best_practices.pdf"
            doc_type = "best_practice"
            "#,
        )?;
        assert_eq!(settings.embedding.provider, EmbeddingProviderKind::Hashing);
        assert_eq!(settings.embedding.dimensions, 64);
        assert_eq!(settings.embedding.max_retries, 3);
        assert_eq!(settings.ingestion.llm_doc_types.len(), 2);
        assert_eq!(settings.ingestion.extra_documents[0].doc_type, DocType::BestPractice);
        Ok(())
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let parsed: Result<Settings, _> = toml::from_str("[embedding]\nprovider = \"cohere\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let mut settings = Settings::default();
        settings.chunking.chunk_overlap = settings.chunking.chunk_size;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn environment_overrides_secrets() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NEO4J_PASSWORD", "s3cret"),
            ("OPENAI_API_KEY", "sk-test"),
            ("NEO4J_URL", "  "),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(settings.store.password, "s3cret");
        assert_eq!(settings.store.url, "http://localhost:7474");
        assert_eq!(settings.embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-test"));
    }
}
