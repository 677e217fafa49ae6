use crate::config::{LlmProviderKind, LlmSettings};
use crate::error::{ConfigError, LlmError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// A model that answers a prompt with output shaped by `schema`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str, schema: &Value) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat completions in JSON mode.
pub struct OpenAiChatModel {
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(settings: &LlmSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|error| ConfigError::Invalid(format!("llm http client: {error}")))?;

        Ok(Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, schema: &Value) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingApiKey(self.provider().to_string()))?;

        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": format!("Respond only with JSON that validates against this schema: {schema}"),
                },
                { "role": "user", "content": prompt },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Provider {
                provider: self.provider().to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: Value = response.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .filter(|content| !content.trim().is_empty())
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }
}

/// `None` when extraction is switched off.
pub fn create_language_model(
    settings: &LlmSettings,
) -> Result<Option<Arc<dyn LanguageModel>>, ConfigError> {
    match settings.provider {
        LlmProviderKind::OpenAi => Ok(Some(Arc::new(OpenAiChatModel::new(settings)?))),
        LlmProviderKind::Disabled => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(api_base: String) -> LlmSettings {
        LlmSettings {
            api_base,
            api_key: Some("sk-test".to_string()),
            ..LlmSettings::default()
        }
    }

    #[tokio::test]
    async fn chat_content_is_returned() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"title\":\"t\"}" } }]
            })))
            .mount(&server)
            .await;

        let model = OpenAiChatModel::new(&settings(server.uri()))?;
        let content = model.complete("prompt", &json!({})).await?;
        assert_eq!(content, "{\"title\":\"t\"}");
        Ok(())
    }

    #[tokio::test]
    async fn provider_errors_carry_status() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let model = OpenAiChatModel::new(&settings(server.uri()))?;
        let result = model.complete("prompt", &json!({})).await;
        assert!(matches!(result, Err(LlmError::Provider { status: 429, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() -> Result<(), Box<dyn std::error::Error>> {
        let mut settings = settings("http://127.0.0.1:9".to_string());
        settings.api_key = None;
        let model = OpenAiChatModel::new(&settings)?;
        let result = model.complete("prompt", &json!({})).await;
        assert!(matches!(result, Err(LlmError::MissingApiKey(_))));
        Ok(())
    }

    #[test]
    fn disabled_provider_builds_no_model() -> Result<(), ConfigError> {
        let settings = LlmSettings {
            provider: LlmProviderKind::Disabled,
            ..LlmSettings::default()
        };
        assert!(create_language_model(&settings)?.is_none());
        Ok(())
    }
}
