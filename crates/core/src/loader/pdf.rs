use crate::config::OcrSettings;
use crate::error::LoadError;
use crate::models::{RawDocument, StructuralHint};
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest<'a> {
    pdf_base64: String,
    source_path: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Multimodal endpoint that reads scanned PDFs lopdf cannot.
#[derive(Debug, Clone)]
pub struct OcrClient {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl OcrClient {
    pub fn from_settings(settings: &OcrSettings, client: Client) -> Option<Self> {
        let endpoint = settings.endpoint.as_ref()?.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        Some(Self {
            endpoint,
            api_key: settings
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            client,
        })
    }

    async fn extract_pages(&self, pdf: &[u8], source: &str) -> Result<Vec<PageText>, LoadError> {
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: source,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            LoadError::OcrFailed(format!("request to {} failed: {error}", self.endpoint))
        })?;

        if !response.status().is_success() {
            return Err(LoadError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response
            .json()
            .await
            .map_err(|error| LoadError::OcrFailed(error.to_string()))?;
        payload_to_pages(&payload, source)
    }
}

/// Reads page text with lopdf on the blocking pool.
pub async fn extract_page_texts(pdf: Vec<u8>) -> Result<Vec<PageText>, LoadError> {
    tokio::task::spawn_blocking(move || extract_pages_blocking(&pdf))
        .await
        .map_err(|error| LoadError::PdfParse(format!("pdf worker failed: {error}")))?
}

fn extract_pages_blocking(pdf: &[u8]) -> Result<Vec<PageText>, LoadError> {
    let document =
        Document::load_mem(pdf).map_err(|error| LoadError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| LoadError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
    }

    if pages.is_empty() {
        return Err(LoadError::PdfParse("pdf had no readable page text".to_string()));
    }

    Ok(pages)
}

/// Loads a PDF, falling back to OCR when lopdf finds no text.
pub async fn load_pdf(
    pdf: Vec<u8>,
    source: &str,
    ocr: Option<&OcrClient>,
) -> Result<RawDocument, LoadError> {
    let pages = match (extract_page_texts(pdf.clone()).await, ocr) {
        (Ok(pages), _) => pages,
        (Err(LoadError::PdfParse(parse_error)), Some(ocr)) => {
            debug!(source = %source, reason = %parse_error, "falling back to multimodal OCR");
            ocr.extract_pages(&pdf, source).await.map_err(|ocr_error| {
                warn!(source = %source, error = %ocr_error, "multimodal OCR fallback failed");
                LoadError::PdfParse(format!(
                    "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                ))
            })?
        }
        (Err(error), _) => return Err(error),
    };

    Ok(pages_to_document(&pages))
}

pub fn pages_to_document(pages: &[PageText]) -> RawDocument {
    let mut text = String::new();
    let mut hints = Vec::with_capacity(pages.len());

    for page in pages {
        let body = page.text.trim();
        if body.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        hints.push(StructuralHint::Page {
            number: page.number,
            offset: text.len(),
        });
        text.push_str(body);
    }

    RawDocument {
        text,
        hints,
        front_matter: Default::default(),
    }
}

fn payload_to_pages(payload: &LlmOcrResponse, source: &str) -> Result<Vec<PageText>, LoadError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: page.page.unwrap_or(1),
                        text: text.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(LoadError::OcrFailed(format!(
        "multimodal OCR response was empty for {source}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrSettings;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn ocr_payload_with_pages_converts_only_nonempty_text() -> Result<(), LoadError> {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    page: Some(3),
                    text: Some("Enable default encryption".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, "x.pdf")?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Enable default encryption");
        Ok(())
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() -> Result<(), LoadError> {
        let response = LlmOcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let pages = payload_to_pages(&response, "x.pdf")?;
        assert_eq!(
            pages,
            vec![
                PageText {
                    number: 1,
                    text: "First".to_string()
                },
                PageText {
                    number: 2,
                    text: "Second".to_string()
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn pages_become_page_hints() {
        let document = pages_to_document(&[
            PageText {
                number: 1,
                text: "Use KMS keys.".to_string(),
            },
            PageText {
                number: 2,
                text: "Block public access.".to_string(),
            },
        ]);

        assert_eq!(document.text, "Use KMS keys.\n\nBlock public access.");
        assert_eq!(
            document.hints,
            vec![
                StructuralHint::Page { number: 1, offset: 0 },
                StructuralHint::Page { number: 2, offset: 15 },
            ]
        );
    }

    #[tokio::test]
    async fn unreadable_pdf_without_ocr_is_a_parse_error() {
        let result = load_pdf(b"%PDF-1.4\n%fake".to_vec(), "fake.pdf", None).await;
        assert!(matches!(result, Err(LoadError::PdfParse(_))));
    }

    #[tokio::test]
    async fn unreadable_pdf_uses_ocr_fallback() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ocr"))
            .and(header("authorization", "Bearer ocr-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "Scanned guidance\u{000C}Second page"
            })))
            .mount(&server)
            .await;

        let settings = OcrSettings {
            endpoint: Some(format!("{}/ocr", server.uri())),
            api_key: Some("ocr-key".to_string()),
        };
        let ocr = OcrClient::from_settings(&settings, Client::new()).ok_or("ocr disabled")?;
        let document = load_pdf(b"%PDF-1.4\n%fake".to_vec(), "scan.pdf", Some(&ocr)).await?;

        assert_eq!(document.text, "Scanned guidance\n\nSecond page");
        assert_eq!(document.hints.len(), 2);
        Ok(())
    }
}
