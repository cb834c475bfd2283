//! Wire types for the pi agent RPC dialect.
//!
//! Inbound values are loosely typed on the wire; decoding is deliberately
//! permissive. Every payload field defaults when absent, multi-word fields
//! accept both camelCase and snake_case spellings, and unrecognized event
//! kinds decode to [`AgentEvent::Other`] instead of failing the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent to the agent. Serialized as `{"id": ..., "type": ..., ...}`
/// with the id injected by the transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    #[serde(rename_all = "camelCase")]
    SetModel { provider: String, model_id: String },
    NewSession,
    Prompt { message: String },
    Abort,
    GetAvailableModels,
}

impl AgentCommand {
    /// Wire name of the command, used for logging and error reporting.
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::SetModel { .. } => "set_model",
            AgentCommand::NewSession => "new_session",
            AgentCommand::Prompt { .. } => "prompt",
            AgentCommand::Abort => "abort",
            AgentCommand::GetAvailableModels => "get_available_models",
        }
    }
}

/// A correlated response to a command.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponse {
    pub id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Token accounting attached to `message_end`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct AgentUsage {
    #[serde(default)]
    pub input: i64,
    #[serde(default)]
    pub output: i64,
    #[serde(default, alias = "cacheRead")]
    pub cache_read: i64,
    #[serde(default, alias = "cacheWrite")]
    pub cache_write: i64,
}

/// Tool invocation summary carried by `toolcall_end` message updates.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Result payload of a tool execution (final or partial).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolResultPayload {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub details: Value,
}

impl ToolResultPayload {
    /// Concatenated text of all `{"type":"text"}` content blocks.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
        }
        out
    }

    /// Unified-diff body reported by file-change tools, when present.
    pub fn diff(&self) -> Option<&str> {
        self.details.get("diff").and_then(Value::as_str)
    }

    /// Exit code reported by command tools, when present.
    pub fn exit_code(&self) -> Option<i64> {
        self.details
            .get("exitCode")
            .or_else(|| self.details.get("exit_code"))
            .and_then(Value::as_i64)
    }
}

/// Sub-events of `message_update`, describing incremental assistant output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    TextDelta {
        #[serde(default)]
        delta: String,
    },
    ThinkingStart,
    ThinkingDelta {
        #[serde(default)]
        delta: String,
    },
    ThinkingEnd {
        #[serde(default)]
        content: Option<String>,
    },
    ToolcallEnd {
        #[serde(alias = "tool_call", rename = "toolCall")]
        tool_call: ToolCallSummary,
    },
}

/// Model descriptor returned by `get_available_models`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default, alias = "isDefault")]
    pub default: bool,
}

/// Typed events streamed by the agent while a prompt runs.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    AgentEnd,
    MessageStart {
        role: Option<String>,
    },
    MessageUpdate {
        event: Option<AssistantEvent>,
    },
    MessageEnd {
        role: Option<String>,
        content: Vec<Value>,
        usage: Option<AgentUsage>,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        partial: Option<ToolResultPayload>,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: Option<String>,
        result: Option<ToolResultPayload>,
        is_error: bool,
    },
    AutoRetryStart {
        error: Option<String>,
    },
    AutoRetryEnd {
        success: bool,
        error: Option<String>,
    },
    HookError {
        hook_path: Option<String>,
        error: Option<String>,
    },
    /// Anything the bridge does not understand; benign by contract.
    Other {
        kind: String,
    },
}

fn str_field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a str> {
    value
        .get(camel)
        .or_else(|| value.get(snake))
        .and_then(Value::as_str)
}

fn field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    value.get(camel).or_else(|| value.get(snake))
}

/// The `message` envelope some agent builds nest role/content/usage inside.
fn message_scope(value: &Value) -> &Value {
    value.get("message").unwrap_or(value)
}

impl AgentEvent {
    /// Decode one inbound event value. Never fails: malformed payload fields
    /// degrade to defaults and unknown kinds map to [`AgentEvent::Other`].
    pub fn parse(value: &Value) -> AgentEvent {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "agent_start" => AgentEvent::AgentStart,
            "agent_end" => AgentEvent::AgentEnd,
            "message_start" => AgentEvent::MessageStart {
                role: message_scope(value)
                    .get("role")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "message_update" => {
                let event = field(value, "assistantMessageEvent", "assistant_message_event")
                    .or_else(|| value.get("event"))
                    .and_then(|raw| serde_json::from_value(raw.clone()).ok());
                AgentEvent::MessageUpdate { event }
            }
            "message_end" => {
                let scope = message_scope(value);
                AgentEvent::MessageEnd {
                    role: scope.get("role").and_then(Value::as_str).map(str::to_string),
                    content: scope
                        .get("content")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                    usage: scope
                        .get("usage")
                        .and_then(|raw| serde_json::from_value(raw.clone()).ok()),
                }
            }
            "tool_execution_start" => AgentEvent::ToolExecutionStart {
                tool_call_id: str_field(value, "toolCallId", "tool_call_id")
                    .unwrap_or_default()
                    .to_string(),
                tool_name: str_field(value, "toolName", "tool_name")
                    .unwrap_or_default()
                    .to_string(),
                args: field(value, "args", "arguments").cloned().unwrap_or(Value::Null),
            },
            "tool_execution_update" => AgentEvent::ToolExecutionUpdate {
                tool_call_id: str_field(value, "toolCallId", "tool_call_id")
                    .unwrap_or_default()
                    .to_string(),
                partial: field(value, "partialResult", "partial_result")
                    .and_then(|raw| serde_json::from_value(raw.clone()).ok()),
            },
            "tool_execution_end" => AgentEvent::ToolExecutionEnd {
                tool_call_id: str_field(value, "toolCallId", "tool_call_id")
                    .unwrap_or_default()
                    .to_string(),
                tool_name: str_field(value, "toolName", "tool_name").map(str::to_string),
                result: value
                    .get("result")
                    .and_then(|raw| serde_json::from_value(raw.clone()).ok()),
                is_error: field(value, "isError", "is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            "auto_retry_start" => AgentEvent::AutoRetryStart {
                error: value.get("error").and_then(Value::as_str).map(str::to_string),
            },
            "auto_retry_end" => AgentEvent::AutoRetryEnd {
                success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
                error: value.get("error").and_then(Value::as_str).map(str::to_string),
            },
            "hook_error" => AgentEvent::HookError {
                hook_path: str_field(value, "hookPath", "hook_path").map(str::to_string),
                error: value.get("error").and_then(Value::as_str).map(str::to_string),
            },
            other => AgentEvent::Other {
                kind: other.to_string(),
            },
        }
    }
}
