//! LLM chunk analysis: prompt, parse, normalize.
//!
//! The model is asked for strict JSON but is not trusted to produce it:
//! fences are stripped, scalar fields are coerced to arrays where arrays
//! are expected, and enum fields are clamped to their valid sets with the
//! set default standing in for anything unrecognized.

use serde_json::Value;

use crate::error::CorpusError;
use crate::llm::{ChatModel, RetryPolicy};
use crate::model::{ChunkAnalysis, ContentType, KeyEntities, Sentiment, TechnicalLevel};

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You analyze a document chunk and reply with a single JSON object, no prose, no markdown fences. Fields:
{
  "title": string,
  "summary": string (1-2 sentences),
  "category": string,
  "content_type": one of "article" | "blog" | "academic" | "news" | "reference" | "other",
  "technical_level": one of "beginner" | "intermediate" | "advanced",
  "sentiment": one of "positive" | "negative" | "neutral" | "mixed",
  "emotions": [string],
  "tags": [string],
  "key_concepts": [string],
  "main_topics": [string],
  "key_entities": {"people": [string], "organizations": [string], "locations": [string]}
}
Use empty arrays when nothing applies."#;

const ANALYSIS_MAX_TOKENS: u32 = 1024;

/// Analyze one chunk, retrying malformed output and retriable upstream
/// failures up to `max_attempts` before giving up with `AnalysisFailed`.
pub async fn analyze(
    chat: &dyn ChatModel,
    chunk_text: &str,
    max_attempts: u32,
) -> Result<ChunkAnalysis, CorpusError> {
    let policy = RetryPolicy {
        max_attempts,
        ..Default::default()
    };
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        match chat
            .complete(ANALYSIS_SYSTEM_PROMPT, chunk_text, ANALYSIS_MAX_TOKENS)
            .await
        {
            Ok(raw) => match parse_analysis(&raw) {
                Ok(analysis) => return Ok(analysis),
                Err(err) => {
                    last_error = format!("unparseable analysis: {err}");
                }
            },
            Err(err) if err.is_retriable() => {
                last_error = err.to_string();
            }
            Err(err) => {
                return Err(CorpusError::AnalysisFailed {
                    attempts: attempt + 1,
                    message: err.to_string(),
                });
            }
        }
        if attempt + 1 < max_attempts {
            tokio::time::sleep(policy.delay(attempt)).await;
        }
    }

    Err(CorpusError::AnalysisFailed {
        attempts: max_attempts,
        message: last_error,
    })
}

/// Parse raw model output into a normalized analysis.
pub fn parse_analysis(raw: &str) -> Result<ChunkAnalysis, CorpusError> {
    let json = extract_json(raw)
        .ok_or_else(|| CorpusError::InvalidInput("no JSON object in analysis output".into()))?;
    let value: Value = serde_json::from_str(json)?;
    if !value.is_object() {
        return Err(CorpusError::InvalidInput(
            "analysis output is not a JSON object".into(),
        ));
    }
    Ok(normalize(&value))
}

/// Slice out the outermost `{…}`, tolerating markdown fences and prose
/// around the object.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn normalize(value: &Value) -> ChunkAnalysis {
    ChunkAnalysis {
        title: str_field(value, "title"),
        summary: str_field(value, "summary"),
        category: str_field(value, "category"),
        content_type: enum_field(value, "content_type", ContentType::parse),
        technical_level: enum_field(value, "technical_level", TechnicalLevel::parse),
        sentiment: enum_field(value, "sentiment", Sentiment::parse),
        emotions: list_field(value, "emotions"),
        tags: list_field(value, "tags"),
        key_concepts: list_field(value, "key_concepts"),
        main_topics: list_field(value, "main_topics"),
        key_entities: entities(value.get("key_entities")),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Coerce a field to a list of strings: arrays keep string-ish entries, a
/// lone scalar becomes a one-element list.
fn list_field(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn enum_field<T: Default>(value: &Value, key: &str, parse: fn(&str) -> Option<T>) -> T {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| parse(s.trim().to_lowercase().as_str()))
        .unwrap_or_default()
}

fn entities(value: Option<&Value>) -> KeyEntities {
    match value {
        Some(v) if v.is_object() => KeyEntities {
            people: list_field(v, "people"),
            organizations: list_field(v, "organizations"),
            locations: list_field(v, "locations"),
        },
        _ => KeyEntities::default(),
    }
}
