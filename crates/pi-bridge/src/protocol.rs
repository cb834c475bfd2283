//! Outer JSON-RPC wire types.
//!
//! The client dialect is newline-delimited JSON: requests carry `id` and
//! `method`, responses echo `id` with one of `result`/`error`, notifications
//! carry `method` without `id`. The `"jsonrpc":"2.0"` marker is always
//! emitted and tolerated when absent on input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2.0";

/// JSON-RPC 2.0 error codes, plus the bridge's private range.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;

    /// Agent unavailable or an agent command failed.
    pub const AGENT_ERROR: i32 = -32000;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(value) => write!(f, "{value}"),
            RequestId::Integer(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request {
        id: RequestId,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Response {
        id: RequestId,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    Notification {
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

impl JsonRpcMessage {
    pub fn response(id: RequestId, result: Value) -> Self {
        JsonRpcMessage::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        JsonRpcMessage::Response {
            id,
            result: None,
            error: Some(serde_json::json!({
                "code": code,
                "message": message.into(),
            })),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Notification {
            method: method.into(),
            params: Some(params),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Create,
    Edit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeEntry {
    pub path: String,
    pub kind: FileChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// A transcript item within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TurnItem {
    #[serde(rename_all = "camelCase")]
    AgentMessage {
        id: String,
        text: String,
        status: ItemStatus,
    },
    #[serde(rename_all = "camelCase")]
    Reasoning {
        id: String,
        content: String,
        status: ItemStatus,
    },
    #[serde(rename_all = "camelCase")]
    CommandExecution {
        id: String,
        command: String,
        aggregated_output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
        status: ItemStatus,
    },
    #[serde(rename_all = "camelCase")]
    FileChange {
        id: String,
        changes: Vec<FileChangeEntry>,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
        status: ItemStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub id: String,
    pub name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub input: Vec<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl TurnStartParams {
    /// Concatenated text of the `{"type":"text"}` input blocks.
    pub fn text(&self) -> String {
        self.input
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadTokenUsage {
    pub input_tokens: i64,
    pub cached_input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Default,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningEffortOption {
    pub reasoning_effort: ReasoningEffort,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub model: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub supported_reasoning_efforts: Vec<ReasoningEffortOption>,
    pub default_reasoning_effort: ReasoningEffort,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    pub used_percent: i64,
    #[serde(default)]
    pub window_duration_mins: Option<i64>,
    #[serde(default)]
    pub resets_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsSnapshot {
    pub has_credits: bool,
    pub unlimited: bool,
    pub balance: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub primary: Option<RateLimitWindow>,
    pub secondary: Option<RateLimitWindow>,
    pub credits: Option<CreditsSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAuthStatus {
    pub provider: String,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_response_and_notification_decode() {
        let request: JsonRpcMessage =
            serde_json::from_str(r#"{"id": 1, "method": "initialize", "params": {}}"#).unwrap();
        match request {
            JsonRpcMessage::Request { id, method, .. } => {
                assert_eq!(id, RequestId::Integer(1));
                assert_eq!(method, "initialize");
            }
            other => panic!("expected request, got {other:?}"),
        }

        let notification: JsonRpcMessage =
            serde_json::from_str(r#"{"method": "initialized"}"#).unwrap();
        assert!(matches!(notification, JsonRpcMessage::Notification { .. }));

        let response: JsonRpcMessage =
            serde_json::from_str(r#"{"id": "abc", "result": {"ok": true}}"#).unwrap();
        assert!(matches!(response, JsonRpcMessage::Response { .. }));
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let message = JsonRpcMessage::error(
            RequestId::Integer(7),
            error_codes::METHOD_NOT_FOUND,
            "Method not found: thread/fork",
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn turn_items_serialize_with_camel_case_tags() {
        let item = TurnItem::CommandExecution {
            id: "item-1".to_string(),
            command: "ls .".to_string(),
            aggregated_output: String::new(),
            exit_code: Some(0),
            status: ItemStatus::Completed,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "commandExecution");
        assert_eq!(value["aggregatedOutput"], "");
        assert_eq!(value["exitCode"], 0);
        assert_eq!(value["status"], "completed");

        let item = TurnItem::FileChange {
            id: "item-2".to_string(),
            changes: vec![FileChangeEntry {
                path: "/f.txt".to_string(),
                kind: FileChangeKind::Create,
                diff: None,
            }],
            exit_code: None,
            status: ItemStatus::InProgress,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "fileChange");
        assert_eq!(value["changes"][0]["kind"], "create");
        assert!(value["changes"][0].get("diff").is_none());
        assert!(value.get("exitCode").is_none());
        assert_eq!(value["status"], "inProgress");
    }

    #[test]
    fn turn_start_params_concatenate_text_blocks() {
        let params: TurnStartParams = serde_json::from_value(json!({
            "threadId": "t-1",
            "input": [
                {"type": "text", "text": "first"},
                {"type": "image", "url": "ignored"},
                {"type": "text", "text": "second"}
            ]
        }))
        .unwrap();
        assert_eq!(params.text(), "first\nsecond");

        let empty: TurnStartParams = serde_json::from_value(json!({"input": []})).unwrap();
        assert_eq!(empty.text(), "");
    }
}
