//! Inner-to-outer event translation.
//!
//! The translator is a synchronous state machine: one inner agent event in,
//! zero or more outer notifications out. It owns the per-turn identifiers
//! (message, reasoning, tool items), the tool-argument cache, and the diff
//! accumulator, and it never suspends.

use std::collections::HashMap;

use serde_json::{Value, json};

use pi_client::{AgentEvent, AgentUsage, AssistantEvent, ToolResultPayload};

use crate::diff::DiffAccumulator;
use crate::protocol::{FileChangeEntry, FileChangeKind, ItemStatus, ThreadTokenUsage, TurnItem};

/// One outer notification to write, in emission order.
#[derive(Debug, Clone)]
pub struct OutboundNotification {
    pub method: String,
    pub params: Value,
}

impl OutboundNotification {
    fn new(method: &str, params: Value) -> Self {
        Self {
            method: method.to_string(),
            params,
        }
    }
}

/// How a tool call is presented in the outer transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Command,
    FileChange(FileChangeKind),
    ReadLike,
}

/// Classification is by tool name: `bash` executes commands, `edit`/`write`
/// change files, everything else is reshaped into a synthetic command line.
pub fn classify_tool(name: &str) -> ToolKind {
    match name {
        "bash" => ToolKind::Command,
        "write" => ToolKind::FileChange(FileChangeKind::Create),
        "edit" => ToolKind::FileChange(FileChangeKind::Edit),
        _ => ToolKind::ReadLike,
    }
}

fn arg_str<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
}

fn arg_path(args: &Value) -> Option<&str> {
    arg_str(args, &["path", "file_path", "filePath", "file"])
}

/// Human-readable command string for a tool invocation.
pub fn display_command(name: &str, args: &Value) -> String {
    match name {
        "bash" => arg_str(args, &["command"]).unwrap_or(name).to_string(),
        "read" => match arg_path(args) {
            Some(path) => format!("read {path}"),
            None => "read".to_string(),
        },
        "ls" => format!("ls {}", arg_path(args).unwrap_or(".")),
        "find" => format!(
            "find \"{}\" in {}",
            arg_str(args, &["pattern"]).unwrap_or_default(),
            arg_path(args).unwrap_or(".")
        ),
        "grep" => format!(
            "grep /{}/ in {}",
            arg_str(args, &["pattern"]).unwrap_or_default(),
            arg_path(args).unwrap_or(".")
        ),
        other => match arg_path(args) {
            Some(path) => format!("{other} {path}"),
            None => other.to_string(),
        },
    }
}

#[derive(Debug, Clone)]
struct CachedTool {
    name: String,
    args: Value,
}

#[derive(Debug, Default)]
pub struct Translator {
    thread_id: Option<String>,
    turn_id: Option<String>,
    /// Set by `turn/interrupt`: the turn is finished outwardly but late
    /// agent events may still arrive and are translated while they map.
    draining: bool,
    message_id: Option<String>,
    message_text: String,
    reasoning_active: bool,
    reasoning_text: String,
    tool_args: HashMap<String, CachedTool>,
    diff: DiffAccumulator,
}

impl Translator {
    pub fn set_thread(&mut self, thread_id: Option<String>) {
        self.thread_id = thread_id;
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn turn_in_flight(&self) -> bool {
        self.turn_id.is_some() && !self.draining
    }

    /// Begin a new turn: allocate state and reset per-turn artifacts.
    pub fn begin_turn(&mut self, turn_id: String) {
        self.turn_id = Some(turn_id);
        self.draining = false;
        self.message_id = None;
        self.message_text.clear();
        self.reasoning_active = false;
        self.reasoning_text.clear();
        self.tool_args.clear();
        self.diff.reset();
    }

    /// Mark the in-flight turn finished from the outer point of view.
    /// Returns the `turn/completed` notification to write, or nothing when
    /// no turn is in flight.
    pub fn interrupt(&mut self) -> Vec<OutboundNotification> {
        if self.draining {
            return Vec::new();
        }
        let Some((thread_id, turn_id)) = self.context() else {
            return Vec::new();
        };
        self.draining = true;
        vec![OutboundNotification::new(
            "turn/completed",
            json!({
                "threadId": thread_id,
                "turn": {"id": turn_id},
            }),
        )]
    }

    /// Terminate the in-flight turn with an error notification followed by
    /// `turn/completed`. Used when the prompt cannot be dispatched or the
    /// agent dies mid-turn.
    pub fn fail_turn(&mut self, message: &str) -> Vec<OutboundNotification> {
        if self.draining {
            return Vec::new();
        }
        let Some((thread_id, turn_id)) = self.context() else {
            return Vec::new();
        };
        let mut out = vec![Self::error_notification(
            &thread_id,
            &turn_id,
            message.to_string(),
            false,
        )];
        out.extend(self.interrupt());
        out
    }

    fn context(&self) -> Option<(String, String)> {
        match (&self.thread_id, &self.turn_id) {
            (Some(thread_id), Some(turn_id)) => Some((thread_id.clone(), turn_id.clone())),
            _ => None,
        }
    }

    fn finish_turn(&mut self) {
        self.turn_id = None;
        self.draining = false;
        self.message_id = None;
        self.message_text.clear();
        self.reasoning_active = false;
        self.reasoning_text.clear();
        self.tool_args.clear();
    }

    fn reasoning_item_id(&self, turn_id: &str) -> String {
        // Reasoning never interleaves with itself; one sentinel per turn.
        format!("reasoning-{turn_id}")
    }

    fn item_started(thread_id: &str, turn_id: &str, item: &TurnItem) -> OutboundNotification {
        OutboundNotification::new(
            "item/started",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "item": item,
            }),
        )
    }

    fn item_completed(thread_id: &str, turn_id: &str, item: &TurnItem) -> OutboundNotification {
        OutboundNotification::new(
            "item/completed",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "item": item,
            }),
        )
    }

    fn error_notification(
        thread_id: &str,
        turn_id: &str,
        message: String,
        will_retry: bool,
    ) -> OutboundNotification {
        OutboundNotification::new(
            "error",
            json!({
                "error": {"message": message},
                "willRetry": will_retry,
                "threadId": thread_id,
                "turnId": turn_id,
            }),
        )
    }

    /// Translate one inner event. Unknown kinds and events that no longer
    /// map onto an open turn are dropped.
    pub fn handle(&mut self, event: &AgentEvent) -> Vec<OutboundNotification> {
        let Some((thread_id, turn_id)) = self.context() else {
            tracing::debug!("agent event outside any turn; dropped");
            return Vec::new();
        };

        match event {
            AgentEvent::AgentStart => {
                self.diff.reset();
                if self.draining {
                    return Vec::new();
                }
                vec![OutboundNotification::new(
                    "turn/started",
                    json!({
                        "threadId": thread_id,
                        "turn": {"id": turn_id},
                    }),
                )]
            }
            AgentEvent::AgentEnd => {
                let was_draining = self.draining;
                self.finish_turn();
                if was_draining {
                    // turn/completed was already emitted at interrupt time.
                    return Vec::new();
                }
                vec![OutboundNotification::new(
                    "turn/completed",
                    json!({
                        "threadId": thread_id,
                        "turn": {"id": turn_id},
                    }),
                )]
            }
            AgentEvent::MessageStart { role } => {
                if role.as_deref() != Some("assistant") {
                    return Vec::new();
                }
                let id = uuid::Uuid::new_v4().to_string();
                self.message_id = Some(id.clone());
                self.message_text.clear();
                vec![Self::item_started(
                    &thread_id,
                    &turn_id,
                    &TurnItem::AgentMessage {
                        id,
                        text: String::new(),
                        status: ItemStatus::InProgress,
                    },
                )]
            }
            AgentEvent::MessageUpdate { event } => match event {
                Some(update) => self.handle_assistant_event(&thread_id, &turn_id, update),
                None => Vec::new(),
            },
            AgentEvent::MessageEnd {
                role,
                content,
                usage,
            } => {
                if role.as_deref() != Some("assistant") {
                    return Vec::new();
                }
                self.handle_message_end(&thread_id, &turn_id, content, *usage)
            }
            AgentEvent::ToolExecutionStart {
                tool_call_id,
                tool_name,
                args,
            } => {
                self.tool_args.insert(
                    tool_call_id.clone(),
                    CachedTool {
                        name: tool_name.clone(),
                        args: args.clone(),
                    },
                );
                let item = self.tool_item(
                    tool_call_id,
                    tool_name,
                    args,
                    None,
                    ItemStatus::InProgress,
                );
                vec![Self::item_started(&thread_id, &turn_id, &item)]
            }
            AgentEvent::ToolExecutionUpdate {
                tool_call_id,
                partial,
            } => {
                let Some(partial) = partial else {
                    return Vec::new();
                };
                let delta = partial.text();
                if delta.is_empty() {
                    return Vec::new();
                }
                let kind = self
                    .tool_args
                    .get(tool_call_id)
                    .map(|cached| classify_tool(&cached.name))
                    .unwrap_or(ToolKind::Command);
                let method = match kind {
                    ToolKind::FileChange(_) => "item/fileChange/outputDelta",
                    _ => "item/commandExecution/outputDelta",
                };
                vec![OutboundNotification::new(
                    method,
                    json!({
                        "threadId": thread_id,
                        "turnId": turn_id,
                        "itemId": tool_call_id,
                        "delta": delta,
                    }),
                )]
            }
            AgentEvent::ToolExecutionEnd {
                tool_call_id,
                tool_name,
                result,
                is_error,
            } => self.handle_tool_end(
                &thread_id,
                &turn_id,
                tool_call_id,
                tool_name.as_deref(),
                result.as_ref(),
                *is_error,
            ),
            AgentEvent::AutoRetryStart { error } => {
                let message = error
                    .clone()
                    .unwrap_or_else(|| "provider request failed; retrying".to_string());
                vec![Self::error_notification(&thread_id, &turn_id, message, true)]
            }
            AgentEvent::AutoRetryEnd { success, error } => {
                if *success {
                    return Vec::new();
                }
                let message = error
                    .clone()
                    .unwrap_or_else(|| "provider request failed after retries".to_string());
                vec![Self::error_notification(
                    &thread_id, &turn_id, message, false,
                )]
            }
            AgentEvent::HookError { hook_path, error } => {
                let detail = error.clone().unwrap_or_else(|| "hook failed".to_string());
                let message = match hook_path {
                    Some(path) => format!("hook {path}: {detail}"),
                    None => detail,
                };
                vec![Self::error_notification(
                    &thread_id, &turn_id, message, false,
                )]
            }
            AgentEvent::Other { kind } => {
                tracing::debug!(kind = %kind, "unhandled agent event");
                Vec::new()
            }
        }
    }

    fn handle_assistant_event(
        &mut self,
        thread_id: &str,
        turn_id: &str,
        event: &AssistantEvent,
    ) -> Vec<OutboundNotification> {
        match event {
            AssistantEvent::TextDelta { delta } => {
                let mut out = Vec::new();
                let id = match &self.message_id {
                    Some(id) => id.clone(),
                    None => {
                        // Delta without a message_start; open the item now.
                        let id = uuid::Uuid::new_v4().to_string();
                        self.message_id = Some(id.clone());
                        self.message_text.clear();
                        out.push(Self::item_started(
                            thread_id,
                            turn_id,
                            &TurnItem::AgentMessage {
                                id: id.clone(),
                                text: String::new(),
                                status: ItemStatus::InProgress,
                            },
                        ));
                        id
                    }
                };
                self.message_text.push_str(delta);
                out.push(OutboundNotification::new(
                    "item/agentMessage/delta",
                    json!({
                        "threadId": thread_id,
                        "turnId": turn_id,
                        "itemId": id,
                        "delta": delta,
                    }),
                ));
                out
            }
            AssistantEvent::ThinkingStart => {
                self.reasoning_active = true;
                self.reasoning_text.clear();
                let id = self.reasoning_item_id(turn_id);
                vec![Self::item_started(
                    thread_id,
                    turn_id,
                    &TurnItem::Reasoning {
                        id,
                        content: String::new(),
                        status: ItemStatus::InProgress,
                    },
                )]
            }
            AssistantEvent::ThinkingDelta { delta } => {
                let mut out = Vec::new();
                if !self.reasoning_active {
                    self.reasoning_active = true;
                    self.reasoning_text.clear();
                    out.push(Self::item_started(
                        thread_id,
                        turn_id,
                        &TurnItem::Reasoning {
                            id: self.reasoning_item_id(turn_id),
                            content: String::new(),
                            status: ItemStatus::InProgress,
                        },
                    ));
                }
                self.reasoning_text.push_str(delta);
                out.push(OutboundNotification::new(
                    "item/reasoning/textDelta",
                    json!({
                        "threadId": thread_id,
                        "turnId": turn_id,
                        "itemId": self.reasoning_item_id(turn_id),
                        "delta": delta,
                    }),
                ));
                out
            }
            AssistantEvent::ThinkingEnd { content } => {
                self.reasoning_active = false;
                let full = match content {
                    Some(content) if !content.is_empty() => content.clone(),
                    _ => std::mem::take(&mut self.reasoning_text),
                };
                vec![Self::item_completed(
                    thread_id,
                    turn_id,
                    &TurnItem::Reasoning {
                        id: self.reasoning_item_id(turn_id),
                        content: full,
                        status: ItemStatus::Completed,
                    },
                )]
            }
            AssistantEvent::ToolcallEnd { tool_call } => {
                vec![Self::item_started(
                    thread_id,
                    turn_id,
                    &TurnItem::CommandExecution {
                        id: tool_call.id.clone(),
                        command: display_command(&tool_call.name, &tool_call.arguments),
                        aggregated_output: String::new(),
                        exit_code: None,
                        status: ItemStatus::InProgress,
                    },
                )]
            }
        }
    }

    fn handle_message_end(
        &mut self,
        thread_id: &str,
        turn_id: &str,
        content: &[Value],
        usage: Option<AgentUsage>,
    ) -> Vec<OutboundNotification> {
        // A completion without a prior start still yields a well-formed item.
        let id = self
            .message_id
            .take()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let content_text = content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        let text = if content_text.is_empty() {
            std::mem::take(&mut self.message_text)
        } else {
            self.message_text.clear();
            content_text
        };

        let mut out = vec![Self::item_completed(
            thread_id,
            turn_id,
            &TurnItem::AgentMessage {
                id,
                text,
                status: ItemStatus::Completed,
            },
        )];

        if let Some(usage) = usage {
            out.push(OutboundNotification::new(
                "thread/tokenUsage/updated",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "tokenUsage": ThreadTokenUsage {
                        input_tokens: usage.input,
                        cached_input_tokens: usage.cache_read,
                        output_tokens: usage.output,
                    },
                }),
            ));
        }

        out
    }

    fn tool_item(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        args: &Value,
        result: Option<(&ToolResultPayload, bool)>,
        status: ItemStatus,
    ) -> TurnItem {
        match classify_tool(tool_name) {
            ToolKind::FileChange(kind) => {
                let path = arg_path(args).unwrap_or_default().to_string();
                let (diff, exit_code) = match result {
                    Some((payload, is_error)) => {
                        let fallback = if is_error { 1 } else { 0 };
                        (
                            payload.diff().map(str::to_string),
                            Some(payload.exit_code().unwrap_or(fallback)),
                        )
                    }
                    None => (None, None),
                };
                TurnItem::FileChange {
                    id: tool_call_id.to_string(),
                    changes: vec![FileChangeEntry { path, kind, diff }],
                    exit_code,
                    status,
                }
            }
            _ => {
                let (aggregated_output, exit_code) = match result {
                    Some((payload, is_error)) => {
                        let fallback = if is_error { 1 } else { 0 };
                        (payload.text(), Some(payload.exit_code().unwrap_or(fallback)))
                    }
                    None => (String::new(), None),
                };
                TurnItem::CommandExecution {
                    id: tool_call_id.to_string(),
                    command: display_command(tool_name, args),
                    aggregated_output,
                    exit_code,
                    status,
                }
            }
        }
    }

    fn handle_tool_end(
        &mut self,
        thread_id: &str,
        turn_id: &str,
        tool_call_id: &str,
        tool_name: Option<&str>,
        result: Option<&ToolResultPayload>,
        is_error: bool,
    ) -> Vec<OutboundNotification> {
        // Consume the cached start; an end without a start degrades to the
        // event's own fields.
        let cached = self.tool_args.remove(tool_call_id);
        let (name, args) = match &cached {
            Some(cached) => (cached.name.clone(), cached.args.clone()),
            None => (
                tool_name.unwrap_or_default().to_string(),
                Value::Null,
            ),
        };

        let empty = ToolResultPayload::default();
        let payload = result.unwrap_or(&empty);
        let item = self.tool_item(
            tool_call_id,
            &name,
            &args,
            Some((payload, is_error)),
            ItemStatus::Completed,
        );
        let mut out = vec![Self::item_completed(thread_id, turn_id, &item)];

        if let ToolKind::FileChange(kind) = classify_tool(&name) {
            let path = arg_path(&args).unwrap_or_default();
            let appended = if let Some(body) = payload.diff() {
                self.diff.append_edit(path, body);
                true
            } else {
                let output = payload.text();
                if kind == FileChangeKind::Create && !output.is_empty() {
                    self.diff.append_created_file(path, &output);
                    true
                } else {
                    false
                }
            };
            if appended {
                out.push(OutboundNotification::new(
                    "turn/diff/updated",
                    json!({
                        "threadId": thread_id,
                        "turnId": turn_id,
                        "diff": self.diff.joined(),
                    }),
                ));
            }
        }

        out
    }

    #[cfg(test)]
    fn tool_cache_len(&self) -> usize {
        self.tool_args.len()
    }
}
