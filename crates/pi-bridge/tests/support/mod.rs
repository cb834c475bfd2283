//! Shared harness: a bridge wired to in-memory pipes, plus a scripted agent.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use pi_bridge::bridge::{Bridge, BridgeConfig};
use pi_client::AgentClient;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub bridge: Bridge,
    pub home: tempfile::TempDir,
    client_write: WriteHalf<DuplexStream>,
    lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    _run: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub async fn new() -> anyhow::Result<Self> {
        // Unreachable by construction; tests that probe override it.
        Self::with_usage_url("http://127.0.0.1:9/api/oauth/usage").await
    }

    pub async fn with_usage_url(usage_url: &str) -> anyhow::Result<Self> {
        let home = tempfile::tempdir()?;
        let cwd = tempfile::tempdir()?;

        let (client_stream, bridge_stream) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_stream);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_stream);

        let bridge = Bridge::new(
            bridge_write,
            BridgeConfig {
                cwd: cwd.keep(),
                home: home.path().to_path_buf(),
                usage_url: usage_url.to_string(),
                wire_log: None,
            },
        );

        let run_bridge = bridge.clone();
        let run = tokio::spawn(async move {
            let _ = run_bridge.run(bridge_read).await;
        });

        Ok(Self {
            bridge,
            home,
            client_write,
            lines: BufReader::new(client_read).lines(),
            _run: run,
        })
    }

    /// Attach a scripted agent: for every inbound command the script returns
    /// the lines (responses and/or events) to write back. Received command
    /// kinds are recorded for ordering assertions.
    pub async fn attach_scripted_agent<F>(&self, mut script: F) -> Arc<Mutex<Vec<String>>>
    where
        F: FnMut(&Value) -> Vec<Value> + Send + 'static,
    {
        let (agent_client_stream, agent_stream) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(agent_client_stream);
        let (agent_read, mut agent_write) = tokio::io::split(agent_stream);

        let (client, channels) =
            AgentClient::connect_with_io(Box::new(client_write), Box::new(client_read));
        self.bridge.attach_agent(client, channels).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(agent_read).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let Ok(command) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                received_clone.lock().await.push(
                    command
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
                for reply in script(&command) {
                    let line = format!("{}\n", serde_json::to_string(&reply).unwrap());
                    if agent_write.write_all(line.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let _ = agent_write.flush().await;
            }
        });

        received
    }

    pub async fn request(&mut self, id: u64, method: &str, params: Value) -> anyhow::Result<()> {
        let line = format!(
            "{}\n",
            serde_json::to_string(&json!({"id": id, "method": method, "params": params}))?
        );
        self.client_write.write_all(line.as_bytes()).await?;
        self.client_write.flush().await?;
        Ok(())
    }

    pub async fn next_message(&mut self) -> anyhow::Result<Value> {
        let line = tokio::time::timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for bridge output"))??
            .ok_or_else(|| anyhow::anyhow!("bridge output closed"))?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Read until the response for `id` arrives, returning it along with the
    /// notifications seen on the way.
    pub async fn wait_response(&mut self, id: u64) -> anyhow::Result<(Value, Vec<Value>)> {
        let mut notifications = Vec::new();
        loop {
            let message = self.next_message().await?;
            if message.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok((message, notifications));
            }
            notifications.push(message);
        }
    }

    /// Read notifications until one with the given method arrives.
    pub async fn collect_until(&mut self, method: &str) -> anyhow::Result<Vec<Value>> {
        let mut notifications = Vec::new();
        loop {
            let message = self.next_message().await?;
            let done = message.get("method").and_then(Value::as_str) == Some(method);
            notifications.push(message);
            if done {
                return Ok(notifications);
            }
        }
    }
}

/// Success response echoing a command envelope.
pub fn ack(command: &Value) -> Value {
    json!({
        "type": "response",
        "id": command["id"].clone(),
        "command": command["type"].clone(),
        "success": true,
        "data": {}
    })
}

pub fn methods(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| message.get("method").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
