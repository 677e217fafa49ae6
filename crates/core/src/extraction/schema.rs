use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Structured guidance the model is asked to produce for one unit of text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BestPracticeExtraction {
    pub title: String,
    pub resource_type: String,
    #[serde(default, deserialize_with = "nullable_list")]
    pub best_practices: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub security: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub compliance: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub pitfalls: Vec<String>,
    pub confidence: f32,
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect())
}

impl BestPracticeExtraction {
    pub fn has_recommendations(&self) -> bool {
        !(self.best_practices.is_empty()
            && self.security.is_empty()
            && self.compliance.is_empty()
            && self.pitfalls.is_empty())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaViolation {
    #[error("response contains no JSON object")]
    NoJson,

    #[error("JSON decode error: {0}")]
    InvalidJson(String),

    #[error("title must not be empty")]
    MissingTitle,

    #[error("no recommendations were extracted")]
    NoRecommendations,

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f32),

    #[error("low confidence ({confidence} < {threshold})")]
    LowConfidence { confidence: f32, threshold: f32 },
}

pub fn best_practice_schema() -> Value {
    let list = |description: &str| {
        json!({
            "type": "array",
            "items": { "type": "string" },
            "description": description,
        })
    };

    json!({
        "title": "BestPracticeExtraction",
        "type": "object",
        "required": ["title", "resource_type", "confidence"],
        "properties": {
            "title": {
                "type": "string",
                "description": "A concise, descriptive title for this best practice (3-12 words)"
            },
            "resource_type": {
                "type": "string",
                "description": "Terraform resource type or context this applies to"
            },
            "best_practices": list("Best practice recommendations"),
            "security": list("Security recommendations"),
            "compliance": list("Compliance requirements"),
            "pitfalls": list("Common pitfalls to avoid"),
            "confidence": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0,
                "description": "Self-assessed confidence in the extraction"
            }
        }
    })
}

pub fn extraction_prompt(text: &str, schema: &Value) -> String {
    format!(
        "You are an expert in Terraform security and best practices.\n\
         Extract from the text below:\n\
         - 'title': a concise, descriptive title (3-12 words).\n\
         - 'resource_type': the Terraform resource or context it applies to.\n\
         - 'best_practices', 'security', 'compliance', 'pitfalls': lists of short statements.\n\
         Include 'confidence' (0.0-1.0): 1.0 means certain, 0.0 means guessing.\n\
         Respond ONLY with a JSON object matching this schema:\n\
         {schema:#}\n\
         Text:\n\
         {text}\n"
    )
}

/// Second attempt after a rejected response.
pub fn corrective_prompt(text: &str, schema: &Value, violation: &str) -> String {
    format!(
        "Your previous answer was rejected: {violation}.\n\
         Return a single JSON object that satisfies the schema, with a nonempty title, \
         at least one recommendation and a numeric confidence. No prose, no code fences.\n\n{}",
        extraction_prompt(text, schema)
    )
}

/// Locates the outermost JSON object in `response` and checks it.
pub fn parse_and_validate(
    response: &str,
    confidence_threshold: f32,
) -> Result<BestPracticeExtraction, SchemaViolation> {
    let start = response.find('{').ok_or(SchemaViolation::NoJson)?;
    let end = response.rfind('}').ok_or(SchemaViolation::NoJson)?;
    if end < start {
        return Err(SchemaViolation::NoJson);
    }

    let extraction: BestPracticeExtraction = serde_json::from_str(&response[start..=end])
        .map_err(|error| SchemaViolation::InvalidJson(error.to_string()))?;

    if extraction.title.trim().is_empty() {
        return Err(SchemaViolation::MissingTitle);
    }
    if !extraction.has_recommendations() {
        return Err(SchemaViolation::NoRecommendations);
    }
    if !(0.0..=1.0).contains(&extraction.confidence) {
        return Err(SchemaViolation::ConfidenceOutOfRange(extraction.confidence));
    }
    if extraction.confidence < confidence_threshold {
        return Err(SchemaViolation::LowConfidence {
            confidence: extraction.confidence,
            threshold: confidence_threshold,
        });
    }

    Ok(extraction)
}
