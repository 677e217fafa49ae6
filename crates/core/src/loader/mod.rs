mod fetch;
mod html;
mod markdown;
mod pdf;

pub use fetch::Fetcher;
pub use html::HtmlCleaner;
pub use markdown::MarkdownParser;
pub use pdf::{extract_page_texts, load_pdf, pages_to_document, OcrClient, PageText};

use crate::config::Settings;
use crate::error::{ConfigError, LoadError};
use crate::models::{DocFormat, DocumentSource, RawDocument};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub struct DocumentLoader {
    fetcher: Fetcher,
    markdown: MarkdownParser,
    html: HtmlCleaner,
    ocr: Option<OcrClient>,
}

impl DocumentLoader {
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let ingestion = &settings.ingestion;
        let client = Client::builder()
            .timeout(Duration::from_secs(ingestion.fetch_timeout_secs))
            .build()
            .map_err(|error| ConfigError::Invalid(format!("http client: {error}")))?;

        Ok(Self {
            fetcher: Fetcher::new(
                client.clone(),
                ingestion.fetch_retries,
                Duration::from_millis(ingestion.fetch_retry_delay_ms),
            ),
            markdown: MarkdownParser::new()?,
            html: HtmlCleaner::new()?,
            ocr: OcrClient::from_settings(&settings.ocr, client),
        })
    }

    pub async fn load(&self, source: &DocumentSource) -> Result<RawDocument, LoadError> {
        let bytes = self.read_bytes(source).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(LoadError::Empty(source.uri.clone()));
        }

        let document = match source.format {
            DocFormat::Markdown => self.markdown.parse(&String::from_utf8_lossy(&bytes)),
            DocFormat::Html => {
                let converted = self.html.to_markdown(&String::from_utf8_lossy(&bytes));
                self.markdown.parse(&converted)
            }
            DocFormat::Pdf => load_pdf(bytes, &source.uri, self.ocr.as_ref()).await?,
        };

        if document.text.trim().is_empty() {
            return Err(LoadError::Empty(source.uri.clone()));
        }

        debug!(
            source = %source.uri,
            format = source.format.as_str(),
            chars = document.text.len(),
            hints = document.hints.len(),
            "document loaded"
        );
        Ok(document)
    }

    async fn read_bytes(&self, source: &DocumentSource) -> Result<Vec<u8>, LoadError> {
        if source.is_remote() {
            return self.fetcher.fetch(&source.uri).await;
        }

        tokio::fs::read(&source.uri)
            .await
            .map_err(|error| LoadError::Io {
                path: source.uri.clone(),
                source: error,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentLoader;
    use crate::config::Settings;
    use crate::error::LoadError;
    use crate::models::{DocFormat, DocType, DocumentSource, StructuralHint};
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(uri: String, format: DocFormat) -> DocumentSource {
        DocumentSource {
            uri,
            format,
            doc_type: DocType::Readme,
            provider: "aws".to_string(),
            service: None,
            name: "README".to_string(),
        }
    }

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.ingestion.fetch_retry_delay_ms = 1;
        settings
    }

    #[tokio::test]
    async fn local_markdown_keeps_heading_hints() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file = dir.path().join("README.md");
        std::fs::write(&file, "# Module\n\nIntro.\n\n## Usage\n\nRun it.\n")?;

        let loader = DocumentLoader::new(&fast_settings())?;
        let document = loader
            .load(&source(file.display().to_string(), DocFormat::Markdown))
            .await?;

        let headings = document
            .hints
            .iter()
            .filter(|hint| matches!(hint, StructuralHint::Heading { .. }))
            .count();
        assert_eq!(headings, 2);
        Ok(())
    }

    #[tokio::test]
    async fn remote_html_is_cleaned() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><nav>menu</nav><h1>Guide</h1><p>Encrypt buckets.</p></body></html>",
            ))
            .mount(&server)
            .await;

        let loader = DocumentLoader::new(&fast_settings())?;
        let document = loader
            .load(&source(format!("{}/guide.html", server.uri()), DocFormat::Html))
            .await?;

        assert_eq!(document.text, "# Guide\n\nEncrypt buckets.");
        assert_eq!(document.title(), Some("Guide"));
        Ok(())
    }

    #[tokio::test]
    async fn whitespace_only_file_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file = dir.path().join("README.md");
        std::fs::write(&file, "  \n\n ")?;

        let loader = DocumentLoader::new(&fast_settings())?;
        let result = loader
            .load(&source(file.display().to_string(), DocFormat::Markdown))
            .await;
        assert!(matches!(result, Err(LoadError::Empty(_))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_a_load_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let loader = DocumentLoader::new(&fast_settings())?;
        let result = loader
            .load(&source(
                dir.path().join("absent.md").display().to_string(),
                DocFormat::Markdown,
            ))
            .await;
        assert!(matches!(result, Err(LoadError::Io { .. })));
        Ok(())
    }
}
