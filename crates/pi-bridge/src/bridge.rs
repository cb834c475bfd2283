//! Bridge session state and the outer request router.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use pi_client::{
    AgentChannels, AgentClient, AgentCommand, AgentError, AgentSpawnConfig, ModelDescriptor,
};

use crate::credentials;
use crate::models::{self, ModelRegistry};
use crate::protocol::{
    JsonRpcMessage, PROTOCOL_VERSION, RequestId, ThreadInfo, TurnStartParams, error_codes,
};
use crate::rate_limits;
use crate::translator::Translator;
use crate::wire_log::WireLog;

const LOGIN_INSTRUCTIONS: &str = "Interactive login is not supported by the bridge. \
Run `pi` in a terminal and use /login to authenticate a provider.";

pub struct BridgeConfig {
    pub cwd: PathBuf,
    pub home: PathBuf,
    pub usage_url: String,
    pub wire_log: Option<WireLog>,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: credentials::default_home(),
            usage_url: rate_limits::usage_url(),
            wire_log: WireLog::from_env(),
        }
    }
}

struct SessionState {
    cwd: PathBuf,
    thread: Option<ThreadInfo>,
    /// Composite `<provider>/<inner-id>`; empty until a model is selected.
    model: String,
    provider: String,
    registry: ModelRegistry,
    translator: Translator,
    agent: Option<Arc<AgentClient>>,
}

struct BridgeInner {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    wire_log: Option<WireLog>,
    state: Mutex<SessionState>,
    home: PathBuf,
    usage_url: String,
}

/// The bridge session: one per process, shared by the request loop and the
/// agent event pump.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                writer: Mutex::new(Box::new(writer)),
                wire_log: config.wire_log,
                state: Mutex::new(SessionState {
                    cwd: config.cwd,
                    thread: None,
                    model: String::new(),
                    provider: String::new(),
                    registry: ModelRegistry::default(),
                    translator: Translator::default(),
                    agent: None,
                }),
                home: config.home,
                usage_url: config.usage_url,
            }),
        }
    }

    /// Drive the bridge from the client's line stream until it closes.
    pub async fn run(&self, reader: impl AsyncRead + Unpin) -> Result<()> {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await.context("client stdin read failed")? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(log) = &self.inner.wire_log {
                log.log_inbound(trimmed);
            }
            self.handle_line(trimmed).await?;
        }
        tracing::info!("client stream closed");
        Ok(())
    }

    /// Terminate the agent, if any. Called on clean exit and on signals.
    pub async fn shutdown(&self) {
        let agent = self.inner.state.lock().await.agent.take();
        if let Some(agent) = agent {
            agent.shutdown().await;
        }
    }

    async fn handle_line(&self, line: &str) -> Result<()> {
        let mut value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, line = %line, "undecodable client line dropped");
                return Ok(());
            }
        };
        // Tolerate lines without the protocol-version marker.
        if let Value::Object(map) = &mut value {
            map.entry("jsonrpc")
                .or_insert_with(|| Value::String(PROTOCOL_VERSION.to_string()));
        }

        let message: JsonRpcMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, line = %line, "malformed client message dropped");
                return Ok(());
            }
        };

        match message {
            JsonRpcMessage::Request { id, method, params } => {
                self.dispatch_request(id, &method, params.unwrap_or(json!({})))
                    .await
            }
            JsonRpcMessage::Notification { method, .. } => {
                tracing::debug!(method = %method, "client notification ignored");
                Ok(())
            }
            JsonRpcMessage::Response { id, .. } => {
                tracing::debug!(?id, "unexpected client response dropped");
                Ok(())
            }
        }
    }

    async fn write_message(&self, message: &JsonRpcMessage) -> Result<()> {
        let mut value = serde_json::to_value(message).context("outbound message encode failed")?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "jsonrpc".to_string(),
                Value::String(PROTOCOL_VERSION.to_string()),
            );
        }
        let payload = serde_json::to_string(&value).context("outbound message encode failed")?;
        if let Some(log) = &self.inner.wire_log {
            log.log_outbound(&payload);
        }
        let mut writer = self.inner.writer.lock().await;
        writer
            .write_all(payload.as_bytes())
            .await
            .context("client write failed")?;
        writer.write_all(b"\n").await.context("client write failed")?;
        writer.flush().await.context("client flush failed")?;
        Ok(())
    }

    async fn write_notifications(
        &self,
        notifications: Vec<crate::translator::OutboundNotification>,
    ) -> Result<()> {
        for notification in notifications {
            self.write_message(&JsonRpcMessage::notification(
                notification.method,
                notification.params,
            ))
            .await?;
        }
        Ok(())
    }

    async fn respond_ok(&self, id: RequestId, result: Value) -> Result<()> {
        self.write_message(&JsonRpcMessage::response(id, result)).await
    }

    async fn respond_err(&self, id: RequestId, code: i32, message: String) -> Result<()> {
        self.write_message(&JsonRpcMessage::error(id, code, message))
            .await
    }

    async fn dispatch_request(&self, id: RequestId, method: &str, params: Value) -> Result<()> {
        tracing::info!(method = %method, id = %id, "handling request");
        match method {
            "initialize" => {
                self.respond_ok(
                    id,
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {"threads": true, "turns": true, "models": true},
                        "serverInfo": {
                            "name": env!("CARGO_PKG_NAME"),
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                    }),
                )
                .await
            }
            "thread/start" => self.handle_thread_start(id, params).await,
            "thread/resume" => self.handle_thread_resume(id, params).await,
            "thread/list" => {
                let state = self.inner.state.lock().await;
                let data = state.thread.iter().collect::<Vec<_>>();
                let result = json!({ "data": data });
                drop(state);
                self.respond_ok(id, result).await
            }
            "thread/archive" => {
                {
                    let mut state = self.inner.state.lock().await;
                    state.thread = None;
                    state.translator.set_thread(None);
                }
                self.respond_ok(id, json!({"success": true})).await
            }
            "turn/start" => self.handle_turn_start(id, params).await,
            "turn/interrupt" | "thread/interrupt" => self.handle_interrupt(id).await,
            "model/list" => self.handle_model_list(id).await,
            "skills/list" => self.respond_ok(id, json!({"data": []})).await,
            "account/rateLimits" | "account/rateLimits/read" => self.handle_rate_limits(id).await,
            "codex/respondToRequest" => self.respond_ok(id, json!({"success": true})).await,
            "auth/status" => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                let providers = credentials::provider_statuses(&self.inner.home, now_ms);
                self.respond_ok(id, json!({"providers": providers})).await
            }
            "auth/login" => {
                self.respond_ok(
                    id,
                    json!({"success": false, "message": LOGIN_INSTRUCTIONS}),
                )
                .await
            }
            other => {
                tracing::warn!(method = %other, "unknown method");
                self.respond_err(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                )
                .await
            }
        }
    }

    async fn handle_thread_start(&self, id: RequestId, params: Value) -> Result<()> {
        let thread = {
            let mut state = self.inner.state.lock().await;
            if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
                state.cwd = PathBuf::from(cwd);
            }
            let thread = ThreadInfo {
                id: uuid::Uuid::new_v4().to_string(),
                name: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            state.thread = Some(thread.clone());
            state.translator.set_thread(Some(thread.id.clone()));
            thread
        };

        // Best-effort session reset; the agent may not even be running yet.
        match self.ensure_agent().await {
            Ok(agent) => {
                if let Err(err) = agent.send(&AgentCommand::NewSession).await {
                    tracing::warn!(error = %err, "new_session failed; continuing");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "agent unavailable for new_session; continuing");
            }
        }

        self.respond_ok(id, json!({"thread": thread})).await
    }

    async fn handle_thread_resume(&self, id: RequestId, params: Value) -> Result<()> {
        let Some(thread_id) = params
            .get("threadId")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return self
                .respond_err(
                    id,
                    error_codes::INVALID_PARAMS,
                    "Missing threadId".to_string(),
                )
                .await;
        };

        {
            let mut state = self.inner.state.lock().await;
            state.thread = Some(ThreadInfo {
                id: thread_id.clone(),
                name: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            });
            state.translator.set_thread(Some(thread_id.clone()));
        }

        self.respond_ok(
            id,
            json!({"threadId": thread_id, "items": [], "status": "ready"}),
        )
        .await
    }

    async fn handle_turn_start(&self, id: RequestId, params: Value) -> Result<()> {
        let params: TurnStartParams = serde_json::from_value(params).unwrap_or_default();
        let text = params.text();
        if text.is_empty() {
            return self
                .respond_err(
                    id,
                    error_codes::INVALID_PARAMS,
                    "No text input provided".to_string(),
                )
                .await;
        }

        {
            let mut state = self.inner.state.lock().await;
            if state.thread.is_none() {
                // The desktop addresses turns by thread id; adopt it when no
                // thread/start preceded this turn.
                let Some(thread_id) = params.thread_id.clone() else {
                    drop(state);
                    return self
                        .respond_err(
                            id,
                            error_codes::INVALID_PARAMS,
                            "Missing threadId".to_string(),
                        )
                        .await;
                };
                state.thread = Some(ThreadInfo {
                    id: thread_id.clone(),
                    name: None,
                    created_at: chrono::Utc::now().to_rfc3339(),
                });
                state.translator.set_thread(Some(thread_id));
            }
        }

        if let Some(model) = params.model.as_deref().filter(|model| !model.is_empty()) {
            let switch = {
                let mut state = self.inner.state.lock().await;
                if model == state.model {
                    None
                } else {
                    Some(state.registry.resolve(model))
                }
            };
            if let Some((provider, inner_id)) = switch {
                let command = AgentCommand::SetModel {
                    provider: provider.clone(),
                    model_id: inner_id.clone(),
                };
                if let Err(err) = self.send_command(&command).await {
                    return self
                        .respond_err(
                            id,
                            error_codes::AGENT_ERROR,
                            format!("set_model failed: {err}"),
                        )
                        .await;
                }
                let mut state = self.inner.state.lock().await;
                state.model = models::compose(&provider, &inner_id);
                state.provider = provider;
                tracing::info!(model = %state.model, provider = %state.provider, "model switched");
            }
        }

        // At most one turn per thread is in flight; a new turn supersedes a
        // still-running one.
        let (superseded, abort_agent) = {
            let mut state = self.inner.state.lock().await;
            let superseded = state.translator.interrupt();
            let agent = if superseded.is_empty() {
                None
            } else {
                state.agent.clone()
            };
            (superseded, agent)
        };
        if let Some(agent) = abort_agent {
            tokio::spawn(async move {
                if let Err(err) = agent.send(&AgentCommand::Abort).await {
                    tracing::warn!(error = %err, "abort of superseded turn failed");
                }
            });
        }
        self.write_notifications(superseded).await?;

        let turn_id = uuid::Uuid::new_v4().to_string();
        {
            let mut state = self.inner.state.lock().await;
            state.translator.begin_turn(turn_id.clone());
        }

        // Respond before any translator-emitted notification for this turn.
        self.respond_ok(
            id,
            json!({"turn": {"id": turn_id, "items": [], "status": "inProgress"}}),
        )
        .await?;

        let bridge = self.clone();
        tokio::spawn(async move {
            if let Err(err) = bridge
                .send_command(&AgentCommand::Prompt { message: text })
                .await
            {
                tracing::warn!(error = %err, "prompt dispatch failed");
                let notifications = {
                    let mut state = bridge.inner.state.lock().await;
                    state.translator.fail_turn(&format!("prompt failed: {err}"))
                };
                if let Err(err) = bridge.write_notifications(notifications).await {
                    tracing::warn!(error = %err, "failed to report prompt failure");
                }
            }
        });

        Ok(())
    }

    async fn handle_interrupt(&self, id: RequestId) -> Result<()> {
        let (notifications, agent) = {
            let mut state = self.inner.state.lock().await;
            let notifications = state.translator.interrupt();
            let agent = if notifications.is_empty() {
                None
            } else {
                state.agent.clone()
            };
            (notifications, agent)
        };

        if let Some(agent) = agent {
            // Non-blocking: signal the agent and move on.
            tokio::spawn(async move {
                if let Err(err) = agent.send(&AgentCommand::Abort).await {
                    tracing::warn!(error = %err, "abort failed");
                }
            });
        }
        self.write_notifications(notifications).await?;
        self.respond_ok(id, json!({"success": true})).await
    }

    async fn handle_model_list(&self, id: RequestId) -> Result<()> {
        let result = match self.send_command(&AgentCommand::GetAvailableModels).await {
            Ok(data) => {
                let models = decode_model_descriptors(&data);
                let mut state = self.inner.state.lock().await;
                state.registry.populate(&models);
                if state.model.is_empty() {
                    let chosen = models
                        .iter()
                        .find(|model| model.default)
                        .or_else(|| models.first());
                    if let Some(model) = chosen {
                        let (provider, inner_id) = state.registry.resolve(&model.id);
                        state.model = models::compose(&provider, &inner_id);
                        state.provider = provider;
                    }
                }
                json!({"data": state.registry.outer_list(&state.model)})
            }
            Err(err) => {
                tracing::warn!(error = %err, "model enumeration failed; using fallback list");
                let state = self.inner.state.lock().await;
                json!({"data": models::fallback_models(&state.model)})
            }
        };
        self.respond_ok(id, result).await
    }

    async fn handle_rate_limits(&self, id: RequestId) -> Result<()> {
        let result =
            match rate_limits::fetch_rate_limits(&self.inner.home, &self.inner.usage_url).await {
                Ok(snapshot) => serde_json::to_value(snapshot)
                    .unwrap_or_else(|_| json!({"primary": null, "secondary": null, "credits": null})),
                Err(err) => {
                    tracing::warn!(error = %err, "rate-limit probe failed");
                    json!({"primary": null, "secondary": null, "credits": null})
                }
            };
        self.respond_ok(id, result).await
    }

    /// Hand an already-connected agent to the bridge. Tests drive the bridge
    /// against scripted agents this way.
    pub async fn attach_agent(&self, client: AgentClient, channels: AgentChannels) {
        self.install_agent(Arc::new(client), channels).await;
    }

    async fn install_agent(&self, agent: Arc<AgentClient>, mut channels: AgentChannels) {
        {
            let mut state = self.inner.state.lock().await;
            state.agent = Some(agent.clone());
        }

        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(event) = channels.events.recv().await {
                let notifications = {
                    let mut state = bridge.inner.state.lock().await;
                    state.translator.handle(&event)
                };
                if let Err(err) = bridge.write_notifications(notifications).await {
                    tracing::warn!(error = %err, "notification write failed");
                    break;
                }
            }

            // Agent stdout closed: clear the handle and fail any open turn.
            let notifications = {
                let mut state = bridge.inner.state.lock().await;
                if state
                    .agent
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &agent))
                {
                    state.agent = None;
                }
                state.translator.fail_turn("agent exited unexpectedly")
            };
            if let Err(err) = bridge.write_notifications(notifications).await {
                tracing::warn!(error = %err, "failed to report agent exit");
            }
        });
    }

    /// Current agent handle, spawning on demand.
    async fn ensure_agent(&self) -> std::result::Result<Arc<AgentClient>, AgentError> {
        {
            let state = self.inner.state.lock().await;
            if let Some(agent) = &state.agent {
                if !agent.is_closed() {
                    return Ok(agent.clone());
                }
            }
        }

        let cwd = self.inner.state.lock().await.cwd.clone();
        let (client, channels) = AgentClient::spawn(AgentSpawnConfig { cwd: Some(cwd) }).await?;
        let agent = Arc::new(client);
        self.install_agent(agent.clone(), channels).await;
        Ok(agent)
    }

    /// Send a command, respawning the agent once if it died underneath us.
    async fn send_command(&self, command: &AgentCommand) -> std::result::Result<Value, AgentError> {
        let agent = self.ensure_agent().await?;
        match agent.send(command).await {
            Err(AgentError::AgentDown) => {
                {
                    let mut state = self.inner.state.lock().await;
                    if state
                        .agent
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, &agent))
                    {
                        state.agent = None;
                    }
                }
                let agent = self.ensure_agent().await?;
                agent.send(command).await
            }
            other => other,
        }
    }
}

fn decode_model_descriptors(data: &Value) -> Vec<ModelDescriptor> {
    let raw = data
        .get("models")
        .and_then(Value::as_array)
        .or_else(|| data.as_array());
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_descriptors_decode_from_either_shape() {
        let wrapped = json!({"models": [
            {"id": "claude-sonnet-4-20250514", "provider": "anthropic"},
            {"not-a-model": true},
        ]});
        let models = decode_model_descriptors(&wrapped);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].provider, "anthropic");

        let bare = json!([{"id": "gpt-5", "provider": "openai", "reasoning": true}]);
        let models = decode_model_descriptors(&bare);
        assert_eq!(models.len(), 1);
        assert!(models[0].reasoning);

        assert!(decode_model_descriptors(&json!({})).is_empty());
    }
}
