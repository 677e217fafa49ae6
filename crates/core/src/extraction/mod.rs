mod llm;
mod schema;

pub use llm::{create_language_model, LanguageModel, OpenAiChatModel};
pub use schema::{
    best_practice_schema, corrective_prompt, extraction_prompt, parse_and_validate,
    BestPracticeExtraction, SchemaViolation,
};

use crate::chunking::{split_recursive, ChunkingConfig};
use crate::config::LlmSettings;
use crate::error::{ExtractionError, LlmError};
use crate::models::{Chunk, ChunkType, DocumentSource, RawDocument};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const PIPELINE_VERSION: &str = "v1.0.0";

#[derive(Debug, Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    #[error("no language model configured")]
    Disabled,
}

pub struct ExtractionPipeline {
    model: Option<Arc<dyn LanguageModel>>,
    chunking: ChunkingConfig,
    min_delay: Duration,
    confidence_threshold: f32,
    schema: Value,
    last_call: Mutex<Option<Instant>>,
}

impl ExtractionPipeline {
    pub fn new(
        model: Option<Arc<dyn LanguageModel>>,
        chunking: ChunkingConfig,
        min_delay: Duration,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            model,
            chunking,
            min_delay,
            confidence_threshold,
            schema: best_practice_schema(),
            last_call: Mutex::new(None),
        }
    }

    pub fn from_settings(
        model: Option<Arc<dyn LanguageModel>>,
        chunking: ChunkingConfig,
        settings: &LlmSettings,
    ) -> Self {
        Self::new(
            model,
            chunking,
            Duration::from_millis(settings.min_delay_ms),
            settings.confidence_threshold,
        )
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().map(|model| model.model())
    }

    pub async fn extract(
        &self,
        document: &RawDocument,
        source: &DocumentSource,
    ) -> Result<Vec<Chunk>, ExtractionError> {
        let units = split_recursive(&document.text, self.chunking);
        let mut chunks = Vec::new();
        let mut degraded = 0usize;

        for (ordinal, unit) in units.iter().enumerate() {
            match self.extract_unit(unit).await {
                Ok(extraction) => chunks.extend(self.render(&extraction, source, ordinal)),
                Err(failure) => {
                    degraded += 1;
                    warn!(
                        source = %source.uri,
                        unit = ordinal,
                        error = %failure,
                        "extraction rejected twice, keeping raw text"
                    );
                    chunks.push(
                        Chunk::from_source(source, ChunkType::Overview, ordinal, unit.clone())
                            .with_metadata("extraction", "degraded")
                            .with_metadata("pipeline_version", PIPELINE_VERSION),
                    );
                }
            }
        }

        chunks.retain(|chunk| !chunk.content.trim().is_empty());
        if chunks.is_empty() {
            return Err(ExtractionError::NoContent(source.uri.clone()));
        }

        debug!(
            source = %source.uri,
            units = units.len(),
            degraded,
            chunks = chunks.len(),
            "extraction finished"
        );
        Ok(chunks)
    }

    /// First attempt, then one corrective attempt naming the rejection.
    pub async fn extract_unit(&self, text: &str) -> Result<BestPracticeExtraction, AttemptFailure> {
        let model = self.model.as_deref().ok_or(AttemptFailure::Disabled)?;

        match self
            .attempt(model, &extraction_prompt(text, &self.schema))
            .await
        {
            Ok(extraction) => Ok(extraction),
            Err(failure) => {
                debug!(error = %failure, "extraction rejected, retrying with correction");
                let prompt = corrective_prompt(text, &self.schema, &failure.to_string());
                self.attempt(model, &prompt).await
            }
        }
    }

    async fn attempt(
        &self,
        model: &dyn LanguageModel,
        prompt: &str,
    ) -> Result<BestPracticeExtraction, AttemptFailure> {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }

        let response = model.complete(prompt, &self.schema).await;
        *last_call = Some(Instant::now());
        drop(last_call);

        Ok(parse_and_validate(&response?, self.confidence_threshold)?)
    }

    fn render(
        &self,
        extraction: &BestPracticeExtraction,
        source: &DocumentSource,
        ordinal: usize,
    ) -> Vec<Chunk> {
        let header = format!(
            "Provider: {}\nService: {}\nName: {}\nType: {}\nTitle: {}\nResource Type: {}",
            source.provider,
            source.service.as_deref().unwrap_or("general"),
            source.name,
            source.doc_type,
            extraction.title,
            extraction.resource_type
        );

        let mut parts = vec![(
            ChunkType::Overview,
            format!("{header}\nConfidence: {:.2}", extraction.confidence),
        )];
        for (chunk_type, label, items) in [
            (ChunkType::BestPractices, "Best Practice Recommendations", &extraction.best_practices),
            (ChunkType::Security, "Security Recommendations", &extraction.security),
            (ChunkType::Compliance, "Compliance Requirements", &extraction.compliance),
            (ChunkType::Pitfalls, "Common Pitfalls", &extraction.pitfalls),
        ] {
            if items.is_empty() {
                continue;
            }
            let numbered = items
                .iter()
                .enumerate()
                .map(|(index, item)| format!("{}. {item}", index + 1))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push((chunk_type, format!("{header}\n\n{label}:\n{numbered}")));
        }

        parts
            .into_iter()
            .map(|(chunk_type, content)| {
                let chunk = Chunk::from_source(source, chunk_type, ordinal, content)
                    .with_metadata("title", extraction.title.clone())
                    .with_metadata("confidence", format!("{:.2}", extraction.confidence))
                    .with_metadata("pipeline_version", PIPELINE_VERSION);
                match self.model_name() {
                    Some(model) => chunk.with_metadata("llm_model", model),
                    None => chunk,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocFormat, DocType};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    const GOOD: &str = r#"{"title": "Encrypt state buckets", "resource_type": "aws_s3_bucket",
        "best_practices": ["Enable versioning"], "security": ["Use SSE-KMS"], "confidence": 0.92}"#;

    struct ScriptedModel {
        replies: StdMutex<VecDeque<String>>,
        prompts: StdMutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: StdMutex::new(replies.iter().map(|reply| reply.to_string()).collect()),
                prompts: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().map(|prompts| prompts.len()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn complete(&self, prompt: &str, _schema: &Value) -> Result<String, LlmError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .ok_or(LlmError::EmptyResponse)
        }
    }

    fn source() -> DocumentSource {
        DocumentSource {
            uri: "docs/aws_best_practices.md".to_string(),
            format: DocFormat::Markdown,
            doc_type: DocType::BestPractice,
            provider: "aws".to_string(),
            service: None,
            name: "aws_best_practices".to_string(),
        }
    }

    fn document(text: &str) -> RawDocument {
        RawDocument {
            text: text.to_string(),
            ..RawDocument::default()
        }
    }

    fn pipeline(model: Option<Arc<dyn LanguageModel>>) -> ExtractionPipeline {
        ExtractionPipeline::new(model, ChunkingConfig::default(), Duration::ZERO, 0.7)
    }

    #[tokio::test]
    async fn valid_output_becomes_typed_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(&[GOOD]));
        let chunks = pipeline(Some(model.clone()))
            .extract(&document("Always encrypt remote state."), &source())
            .await?;

        let kinds: Vec<ChunkType> = chunks.iter().map(|chunk| chunk.chunk_type).collect();
        assert_eq!(
            kinds,
            vec![ChunkType::Overview, ChunkType::BestPractices, ChunkType::Security]
        );
        assert!(chunks[2].content.ends_with("Security Recommendations:\n1. Use SSE-KMS"));
        assert_eq!(chunks[0].source_metadata.get("llm_model").map(String::as_str), Some("scripted-1"));
        assert_eq!(model.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn one_corrective_retry_is_made() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(&["not json", GOOD]));
        let chunks = pipeline(Some(model.clone()))
            .extract(&document("Always encrypt remote state."), &source())
            .await?;

        assert_eq!(model.calls(), 2);
        assert_eq!(chunks.len(), 3);
        let prompts = model.prompts.lock().map(|p| p.clone()).unwrap_or_default();
        assert!(prompts[1].starts_with("Your previous answer was rejected: response contains no JSON object."));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_output_degrades_to_raw_overview() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(&["{}", "still wrong", "never asked"]));
        let chunks = pipeline(Some(model.clone()))
            .extract(&document("Tag every resource with an owner."), &source())
            .await?;

        assert_eq!(model.calls(), 2);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Overview);
        assert_eq!(chunks[0].content, "Tag every resource with an owner.");
        assert_eq!(chunks[0].name, source().name);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_model_keeps_raw_text() -> Result<(), Box<dyn std::error::Error>> {
        let chunks = pipeline(None)
            .extract(&document("Pin provider versions."), &source())
            .await?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].source_metadata.get("extraction").map(String::as_str),
            Some("degraded")
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_document_is_an_extraction_error() {
        let result = pipeline(None).extract(&document("   "), &source()).await;
        assert!(matches!(result, Err(ExtractionError::NoContent(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_spaced_by_min_delay() -> Result<(), Box<dyn std::error::Error>> {
        let model = Arc::new(ScriptedModel::new(&[GOOD, GOOD]));
        let pipeline = ExtractionPipeline::new(
            Some(model),
            ChunkingConfig::default(),
            Duration::from_secs(1),
            0.7,
        );

        let started = Instant::now();
        pipeline.extract_unit("first").await?;
        pipeline.extract_unit("second").await?;
        assert!(started.elapsed() >= Duration::from_secs(1));
        Ok(())
    }
}
