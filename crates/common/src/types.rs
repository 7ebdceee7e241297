//! Core types shared across the gateway
//!
//! Request/response bodies, retrieval results, filters, and stream events.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Role of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A retrieved row with its relevance score
///
/// The score is opaque: it orders results within one pass from one
/// source; after fusion it is the fused score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    pub score: f32,
}

impl SearchResult {
    /// Deduplication / fusion key: the id when present and non-empty,
    /// otherwise the full content.
    pub fn key(&self) -> &str {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.content,
        }
    }
}

/// A document packed into the completion context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDocument {
    pub content: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Boolean connective for structured filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

impl FilterLogic {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterLogic::And => "AND",
            FilterLogic::Or => "OR",
        }
    }
}

impl Serialize for FilterLogic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

impl<'de> Deserialize<'de> for FilterLogic {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.to_uppercase().as_str() {
            "AND" => Ok(FilterLogic::And),
            "OR" => Ok(FilterLogic::Or),
            other => Err(serde::de::Error::custom(format!(
                "invalid filter logic {other:?}, expected AND or OR"
            ))),
        }
    }
}

/// One structured filter condition
///
/// The operator is validated against a whitelist at compile time; the
/// value shape depends on the operator (scalar, list for IN/NOT IN,
/// absent for IS NULL/IS NOT NULL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    pub operator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// A structured, user-facing filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub logic: FilterLogic,
}

/// A pipeline-configured filter: either a raw SQL fragment
/// (admin-controlled, emitted verbatim) or a structured filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigFilter {
    RawSql(String),
    Structured(Filter),
}

/// Body of `POST /v1/pipelines/{name}`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 10000))]
    pub query: String,
    #[serde(default)]
    pub stream: bool,
    pub top_n: Option<i64>,
    #[serde(default)]
    pub include_sources: bool,
    pub filter: Option<Filter>,
    pub messages: Option<Vec<ChatMessage>>,
}

/// Non-streaming query response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<ContextDocument>>,
    pub tokens_used: u32,
}

/// One server-sent event on a streaming response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk { content: String },
    Done,
    Error { error: String },
}

/// Pipeline listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_result_key_prefers_non_empty_id() {
        let with_id = SearchResult {
            id: Some("42".into()),
            content: "alpha".into(),
            score: 1.0,
        };
        assert_eq!(with_id.key(), "42");

        let empty_id = SearchResult {
            id: Some(String::new()),
            content: "alpha".into(),
            score: 1.0,
        };
        assert_eq!(empty_id.key(), "alpha");

        let no_id = SearchResult {
            id: None,
            content: "beta".into(),
            score: 1.0,
        };
        assert_eq!(no_id.key(), "beta");
    }

    #[test]
    fn filter_logic_is_case_insensitive() {
        let f: Filter = serde_json::from_str(r#"{"conditions":[],"logic":"or"}"#).unwrap();
        assert_eq!(f.logic, FilterLogic::Or);

        let err = serde_json::from_str::<Filter>(r#"{"conditions":[],"logic":"XOR"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn filter_logic_defaults_to_and() {
        let f: Filter = serde_json::from_str(r#"{"conditions":[]}"#).unwrap();
        assert_eq!(f.logic, FilterLogic::And);
    }

    #[test]
    fn config_filter_accepts_string_or_object() {
        let raw: ConfigFilter = serde_json::from_str(r#""tenant = 'acme'""#).unwrap();
        assert!(matches!(raw, ConfigFilter::RawSql(_)));

        let structured: ConfigFilter = serde_json::from_str(
            r#"{"conditions":[{"column":"lang","operator":"=","value":"en"}]}"#,
        )
        .unwrap();
        assert!(matches!(structured, ConfigFilter::Structured(_)));
    }

    #[test]
    fn stream_event_wire_shape() {
        let chunk = StreamEvent::Chunk {
            content: "hi".into(),
        };
        assert_eq!(
            serde_json::to_string(&chunk).unwrap(),
            r#"{"type":"chunk","content":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::Done).unwrap(),
            r#"{"type":"done"}"#
        );
    }
}
