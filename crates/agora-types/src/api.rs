use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{DirectChatUser, MessageGroup};

// -- Acknowledgements --

/// Body of a socket acknowledgement: `{ success, data | error }`.
#[derive(Debug, Clone, PartialEq)]
pub struct AckResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl AckResponse {
    /// Read the first ack argument. A missing or non-object argument is
    /// treated as a bare success carrying that value.
    pub fn from_args(args: &[Value]) -> Self {
        let Some(first) = args.first() else {
            return Self {
                success: true,
                data: None,
                error: None,
            };
        };

        let Some(obj) = first.as_object() else {
            return Self {
                success: true,
                data: Some(first.clone()),
                error: None,
            };
        };

        let success = obj.get("success").and_then(Value::as_bool).unwrap_or(true);
        let data = obj.get("data").filter(|v| !v.is_null()).cloned();
        let error = obj.get("error").and_then(|e| match e {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            Value::Object(o) => o
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            other => Some(other.to_string()),
        });

        Self {
            success,
            data,
            error,
        }
    }

    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "Request was rejected by the server".to_string())
    }
}

// -- Direct conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConversationQuery {
    pub page: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_timestamp: Option<String>,
}

impl Default for DirectConversationQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 50,
            before_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: Option<u64>,
    pub has_more: bool,
}

/// One page of a direct conversation as returned by the REST API.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectConversationPage {
    pub groups: Vec<MessageGroup>,
    pub other_user: Option<DirectChatUser>,
    pub pagination: Pagination,
}

impl DirectConversationPage {
    pub fn message_count(&self) -> usize {
        self.groups.iter().map(|g| g.messages.len()).sum()
    }
}
