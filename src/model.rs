//! Graph records, conversation turns and API payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label used when the graph reports a node without labels.
pub const DEFAULT_LABEL: &str = "Entity";
/// Title used when a node has neither `name` nor `title`.
pub const UNTITLED: &str = "Untitled";
/// Keys owned by the struct fields; node properties with these names are dropped.
const RESERVED_KEYS: [&str; 2] = ["labels", "score"];

/// Graph node materialized as its property map, labels and relevance score.
///
/// Serializes as the flattened property map plus `labels` and `score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(flatten)]
    pub properties: Map<String, Value>,
    pub labels: Vec<String>,
    pub score: f64,
}

impl Entity {
    pub fn new(labels: Vec<String>, mut properties: Map<String, Value>, score: f64) -> Self {
        for key in RESERVED_KEYS {
            properties.remove(key);
        }
        let labels = if labels.is_empty() {
            vec![DEFAULT_LABEL.to_string()]
        } else {
            labels
        };
        Self {
            properties,
            labels,
            score,
        }
    }

    /// String form of the `id` property, if any.
    pub fn id(&self) -> Option<String> {
        match self.properties.get("id")? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn primary_label(&self) -> &str {
        self.labels
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_LABEL)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Non-empty textual value of a property.
    pub fn text(&self, key: &str) -> Option<String> {
        self.properties.get(key).and_then(render_value)
    }

    /// `name`, else `title`, else "Untitled".
    pub fn display_title(&self) -> String {
        self.text("name")
            .or_else(|| self.text("title"))
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    /// `content`, else `description`, else empty.
    pub fn summary_text(&self) -> String {
        self.text("content")
            .or_else(|| self.text("description"))
            .unwrap_or_default()
    }
}

/// Render a property value as display text; `None` for falsy values
/// (null, false, zero, empty string/list/map).
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("True".to_string()),
        Value::Number(n) => {
            if n.as_f64() == Some(0.0) {
                None
            } else {
                Some(n.to_string())
            }
        }
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Object(map) if map.is_empty() => None,
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Edge between a top-ranked entity and one of its direct neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub relationship: String,
    pub target_id: Option<String>,
    pub target_name: String,
    pub target_labels: Vec<String>,
}

/// One question/answer exchange within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Body of `POST /ask`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDetails {
    pub total_results: usize,
    pub relationships_found: usize,
    pub session_id: String,
}

/// Response of `POST /ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<Entity>>,
    pub query_details: QueryDetails,
}

/// Histogram bucket used by `GET /explore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: i64,
}

/// Response of `GET /explore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreResponse {
    pub entity_types: Vec<TypeCount>,
    pub relationship_types: Vec<TypeCount>,
    pub keyword: Option<String>,
}
