use crate::config::{EmbeddingProviderKind, EmbeddingSettings};
use crate::error::{ConfigError, EmbeddingError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Character trigram hashing into a fixed number of buckets.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3.min(chars.len())) {
            let mut hash = 1469598103934665603u64;
            for byte in window.iter().collect::<String>().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// `POST {api_base}/embeddings` on an OpenAI-compatible endpoint.
pub struct OpenAiEmbedder {
    api_base: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|error| ConfigError::Invalid(format!("embedding http client: {error}")))?;

        Ok(Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::MissingApiKey(self.name().to_string()))?;

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(api_key)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Provider {
                provider: self.name().to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: Value = response.json().await?;
        parse_openai_embeddings(&payload)
    }
}

fn parse_openai_embeddings(payload: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::MalformedResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|index| index as usize)
            .unwrap_or(position);
        let values = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::MalformedResponse("missing embedding".to_string()))?;
        let vector = values
            .iter()
            .map(|value| {
                value.as_f64().map(|number| number as f32).ok_or_else(|| {
                    EmbeddingError::MalformedResponse("non-numeric embedding value".to_string())
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

pub fn create_embedding_provider(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
    match settings.provider {
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(settings)?)),
        EmbeddingProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(settings.dimensions))),
    }
}

/// Batching, retry and shape checks around a provider.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_retries,
            retry_delay,
        }
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(
            create_embedding_provider(settings)?,
            settings.batch_size,
            settings.max_retries,
            Duration::from_millis(settings.retry_delay_ms),
        ))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embed_with_retry(batch).await?;
            if embedded.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            for vector in &embedded {
                if vector.len() != self.dimensions() {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimensions(),
                        actual: vector.len(),
                    });
                }
            }
            vectors.extend(embedded);
        }

        debug!(
            provider = self.provider_name(),
            texts = texts.len(),
            "embedded texts"
        );
        Ok(vectors)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(&[query.to_string()])
            .await?
            .pop()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0u32;
        loop {
            match self.provider.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        provider = self.provider_name(),
                        attempt = attempt + 1,
                        error = %error,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openai(api_base: String, dimensions: usize) -> EmbeddingSettings {
        EmbeddingSettings {
            api_base,
            dimensions,
            api_key: Some("sk-test".to_string()),
            retry_delay_ms: 1,
            ..EmbeddingSettings::default()
        }
    }

    #[test]
    fn hashing_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.embed("aws_s3_bucket"), embedder.embed("aws_s3_bucket"));
        assert_eq!(embedder.embed("abc").len(), 64);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let embedder = HashingEmbedder::new(128);
        let vector = embedder.embed("versioning configuration");
        assert!((cosine_similarity(&vector, &vector) - 1.0).abs() < 1e-5);
        assert_eq!(cosine_similarity(&vector, &[0.0; 3]), 0.0);
    }

    #[tokio::test]
    async fn service_batches_hashing_provider() -> Result<(), Box<dyn std::error::Error>> {
        let service = EmbeddingService::new(Arc::new(HashingEmbedder::new(16)), 2, 0, Duration::ZERO);
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"].iter().map(|t| t.to_string()).collect();
        let vectors = service.embed(&texts).await?;
        assert_eq!(vectors.len(), 5);
        assert!(vectors.iter().all(|vector| vector.len() == 16));
        Ok(())
    }

    #[tokio::test]
    async fn openai_response_is_reordered_by_index() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ]
            })))
            .mount(&server)
            .await;

        let service = EmbeddingService::from_settings(&openai(server.uri(), 2))?;
        let vectors = service.embed(&["first".to_string(), "second".to_string()]).await?;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        Ok(())
    }

    #[tokio::test]
    async fn rate_limits_are_retried() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [0.5, 0.5] }]
            })))
            .mount(&server)
            .await;

        let service = EmbeddingService::from_settings(&openai(server.uri(), 2))?;
        let vector = service.embed_query("bucket policy").await?;
        assert_eq!(vector, vec![0.5, 0.5]);
        Ok(())
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let service = EmbeddingService::from_settings(&openai(server.uri(), 2))?;
        let result = service.embed_query("bucket policy").await;
        assert!(matches!(
            result,
            Err(EmbeddingError::Provider { status: 400, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_dimensions_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [0.5, 0.5, 0.5] }]
            })))
            .mount(&server)
            .await;

        let service = EmbeddingService::from_settings(&openai(server.uri(), 2))?;
        let result = service.embed_query("bucket policy").await;
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_fails_before_request() {
        let provider = HashingEmbedder::new(4);
        assert_eq!(provider.name(), "hashing");
        let settings = EmbeddingSettings {
            api_key: None,
            ..EmbeddingSettings::default()
        };
        let service = match EmbeddingService::from_settings(&settings) {
            Ok(service) => service,
            Err(error) => panic!("client should build: {error}"),
        };
        assert!(matches!(
            service.embed_query("x").await,
            Err(EmbeddingError::MissingApiKey(_))
        ));
    }
}
