//! Wire types for the AI provider. Every field that isn't load-bearing for
//! the pipeline is `#[serde(default)]` so a provider quirk (an extra field,
//! a missing optional one) never turns into a hard parse failure — the
//! same defensive posture a multi-provider chat client takes toward
//! response schemas it doesn't fully control.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

/// A resilient response envelope: captures only what we read, tolerates
/// anything else a provider adds.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResilientGenerateResponse {
    #[serde(default)]
    pub candidates: Vec<ResilientCandidate>,
    #[serde(default)]
    pub usage_metadata: Option<ResilientUsage>,
    #[serde(default)]
    pub prompt_feedback: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResilientCandidate {
    #[serde(default)]
    pub content: Option<ResilientContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResilientContent {
    #[serde(default)]
    pub parts: Vec<ResilientPart>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResilientPart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResilientUsage {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

impl ResilientGenerateResponse {
    pub fn first_text(&self) -> Option<&str> {
        self.candidates.first()?.content.as_ref()?.parts.first()?.text.as_deref()
    }
}

/// Provider error bodies vary by vendor; this covers the shapes a
/// Gemini-compatible and an OpenAI-compatible backend both use.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ProviderErrorBody {
    Wrapped { error: ProviderErrorDetail },
    Simple { message: String },
}

#[derive(Debug, Deserialize)]
pub struct ProviderErrorDetail {
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
}

impl ProviderErrorBody {
    pub fn message(&self) -> &str {
        match self {
            ProviderErrorBody::Wrapped { error } => &error.message,
            ProviderErrorBody::Simple { message } => message,
        }
    }
}

/// The structured payload the unified-analysis prompt asks the model to
/// return as JSON. `#[serde(default)]` on every field means a model that
/// only partially follows the schema still parses instead of failing the
/// whole call.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ArticleAnalysis {
    #[serde(default)]
    pub optimized_title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub is_advertisement: bool,
    #[serde(default)]
    pub ad_confidence: f64,
    #[serde(default)]
    pub ad_type: Option<String>,
    #[serde(default)]
    pub ad_reasoning: Option<String>,
    #[serde(default)]
    pub ad_markers: Vec<String>,
    #[serde(default)]
    pub categories: Vec<CategoryLabel>,
}

/// One AI-proposed category label. An article can carry more than one;
/// `category::resolve_all` dedupes and caps the set that's actually linked.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CategoryLabel {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SelectorDiscovery {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_missing_optional_fields() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#;
        let parsed: ResilientGenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.first_text(), Some("hello"));
    }

    #[test]
    fn parses_analysis_missing_ad_fields() {
        let raw = r#"{"optimized_title":"T","summary":"S","categories":[{"name":"tech","confidence":0.8}]}"#;
        let parsed: ArticleAnalysis = serde_json::from_str(raw).unwrap();
        assert!(!parsed.is_advertisement);
        assert_eq!(parsed.categories[0].name, "tech");
    }

    #[test]
    fn reads_simple_and_wrapped_error_bodies() {
        let wrapped: ProviderErrorBody = serde_json::from_str(r#"{"error":{"message":"bad request"}}"#).unwrap();
        assert_eq!(wrapped.message(), "bad request");
        let simple: ProviderErrorBody = serde_json::from_str(r#"{"message":"boom"}"#).unwrap();
        assert_eq!(simple.message(), "boom");
    }
}
