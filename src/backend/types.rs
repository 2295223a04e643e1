use crate::chat::ConversationThread;
use crate::filters::{ExtractedFilters, FilterState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// Wire types for the traceability backend HTTP API. The backend is an
// external collaborator; these mirror its request/response shapes verbatim.

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

/// Non-2xx bodies carry either `error` or `message` depending on the route.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn text(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct ProtectedResponse {
    pub username: String,
    pub usercode: String,
}

#[derive(Debug, Serialize)]
pub struct HashRequest {
    pub tickbarr: String,
}

#[derive(Debug, Deserialize)]
pub struct HashResponse {
    pub hash: String,
}

/// Advanced-search request. Only provided filters are serialized; the
/// backend requires at least one.
#[derive(Debug, Default, Serialize)]
pub struct FilterDataRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numecaja: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub esticlie: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etiqclie: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coditall: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterDataResponse {
    pub success: bool,
    pub count: i64,
    pub data: Vec<Value>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub question: String,
    pub model: String,
    pub filters: FilterState,
    pub user_code: String,
    pub user_name: String,
    pub conversation_group: i64,
}

/// Inference reply. Everything is optional: a reply may carry a response,
/// only an error field, or neither (malformed); each case maps to a
/// different assistant message.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatResponse {
    pub success: bool,
    pub response: Option<String>,
    pub extracted_filters: Option<HashMap<String, Value>>,
    pub corrections: Option<HashMap<String, String>>,
    pub error: Option<String>,
}

impl ChatResponse {
    /// Extracted filters normalized to strings. The model occasionally emits
    /// numbers (box numbers, ages); nulls and nested values are dropped.
    pub fn extracted_as_strings(&self) -> ExtractedFilters {
        let mut out = ExtractedFilters::new();
        if let Some(raw) = &self.extracted_filters {
            for (key, value) in raw {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                out.insert(key.clone(), text);
            }
        }
        out
    }

    pub fn has_extracted_values(&self) -> bool {
        self.extracted_as_strings()
            .values()
            .any(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct UserRequest {
    pub user_code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConversationsResponse {
    pub success: bool,
    pub conversations: Vec<ConversationThread>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CurrentGroupResponse {
    pub success: bool,
    pub conversation_group: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryRequest {
    pub user_code: String,
    pub conversation_group: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryResponse {
    pub success: bool,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewConversationResponse {
    pub success: bool,
    pub conversation_group: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeleteConversationRequest {
    pub user_code: String,
    pub conversation_group: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteConversationResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_tolerates_partial_bodies() {
        let only_error: ChatResponse = serde_json::from_str(r#"{"error":"no data"}"#).unwrap();
        assert_eq!(only_error.error.as_deref(), Some("no data"));
        assert!(!only_error.success);
        assert!(only_error.response.is_none());

        let malformed: ChatResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(malformed.response.is_none() && malformed.error.is_none());
    }

    #[test]
    fn extracted_filters_normalize_numbers_and_skip_nulls() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{"success":true,"response":"ok","extracted_filters":{"boxNumber":12,"size":"M","gender":null}}"#,
        )
        .unwrap();

        let extracted = reply.extracted_as_strings();
        assert_eq!(extracted.get("boxNumber").map(String::as_str), Some("12"));
        assert_eq!(extracted.get("size").map(String::as_str), Some("M"));
        assert!(!extracted.contains_key("gender"));
        assert!(reply.has_extracted_values());
    }

    #[test]
    fn filter_request_omits_unset_fields() {
        let req = FilterDataRequest {
            numecaja: Some("12".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert_eq!(json["numecaja"], "12");
    }
}
