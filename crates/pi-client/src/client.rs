//! Agent subprocess supervision and command correlation.

use std::collections::{HashMap, HashSet};
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::error::{AgentError, Result};
use crate::types::{AgentCommand, AgentEvent, AgentResponse};

/// Credential variables forwarded to the agent. The bridge never reads their
/// values; the agent authenticates with its providers directly.
const FORWARDED_ENV: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "GOOGLE_API_KEY",
    "MISTRAL_API_KEY",
    "OPENCODE_API_KEY",
    "PI_MONOREPO",
];

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type PendingCommand = oneshot::Sender<Result<Value>>;
type PendingCommands = HashMap<String, PendingCommand>;
type AgentWriter = Box<dyn AsyncWrite + Send + Unpin>;
type AgentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streams delivered alongside a connected client.
pub struct AgentChannels {
    /// Typed events emitted while a prompt is running.
    pub events: mpsc::Receiver<AgentEvent>,
}

#[derive(Default)]
pub struct AgentSpawnConfig {
    pub cwd: Option<PathBuf>,
}

struct AgentTransport {
    stdin: Arc<Mutex<AgentWriter>>,
    pending: Arc<Mutex<PendingCommands>>,
    closed: Arc<AtomicBool>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl AgentTransport {
    fn new(stdin: AgentWriter, stdout: AgentReader) -> (Self, AgentChannels) {
        let stdin = Arc::new(Mutex::new(stdin));
        let pending: Arc<Mutex<PendingCommands>> = Arc::new(Mutex::new(PendingCommands::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel(256);

        let pending_clone = pending.clone();
        let closed_clone = closed.clone();
        let reader_task = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let value: Value = match serde_json::from_str(trimmed) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(error = %err, line = %trimmed, "agent JSON parse failed");
                        continue;
                    }
                };

                if value.get("type").and_then(Value::as_str) == Some("response") {
                    let response: AgentResponse = match serde_json::from_value(value) {
                        Ok(response) => response,
                        Err(err) => {
                            tracing::warn!(error = %err, "agent response decode failed");
                            continue;
                        }
                    };
                    let mut pending = pending_clone.lock().await;
                    let Some(sink) = pending.remove(&response.id) else {
                        tracing::warn!(
                            id = %response.id,
                            command = %response.command,
                            "agent response without pending command"
                        );
                        continue;
                    };
                    let result = if response.success {
                        Ok(response.data)
                    } else {
                        Err(AgentError::Command(
                            response
                                .error
                                .unwrap_or_else(|| format!("{} failed", response.command)),
                        ))
                    };
                    let _ = sink.send(result);
                    continue;
                }

                let event = AgentEvent::parse(&value);
                if event_tx.send(event).await.is_err() {
                    tracing::debug!("agent event receiver dropped");
                }
            }

            closed_clone.store(true, Ordering::SeqCst);
            let mut pending = pending_clone.lock().await;
            for (_, sink) in pending.drain() {
                let _ = sink.send(Err(AgentError::AgentDown));
            }
        });

        (
            Self {
                stdin,
                pending,
                closed,
                reader_task: Some(reader_task),
            },
            AgentChannels { events: event_rx },
        )
    }

    async fn send(&self, command: &AgentCommand) -> Result<Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let mut envelope = match serde_json::to_value(command)? {
            Value::Object(map) => map,
            other => {
                // Commands always serialize to objects; keep the stream sane anyway.
                let mut map = serde_json::Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        envelope.insert("id".to_string(), Value::String(id.clone()));

        if let Err(err) = self.write_line(&Value::Object(envelope)).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        rx.await.map_err(|_| AgentError::Canceled)?
    }

    async fn write_line(&self, value: &Value) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

impl Drop for AgentTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Handle to a running (or injected) agent process.
pub struct AgentClient {
    transport: AgentTransport,
    process: Mutex<Option<Child>>,
    stderr_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AgentClient {
    /// Locate and spawn the agent, wiring its three standard pipes.
    pub async fn spawn(config: AgentSpawnConfig) -> Result<(Self, AgentChannels)> {
        let command_line = resolve_agent_command().ok_or(AgentError::NotFound)?;

        let mut cmd = Command::new(&command_line.program);
        cmd.args(&command_line.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = config.cwd {
            cmd.current_dir(cwd);
        }
        for key in FORWARDED_ENV {
            if let Ok(value) = env::var(key) {
                cmd.env(key, value);
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| AgentError::Spawn(err.to_string()))?;
        let stdin: ChildStdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Spawn("agent stdin missing".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("agent stdout missing".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Spawn("agent stderr missing".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    tracing::debug!(target: "pi_agent_stderr", "{line}");
                }
            }
        });

        tracing::info!(program = %command_line.program.display(), "spawned pi agent");

        let (transport, channels) = AgentTransport::new(Box::new(stdin), Box::new(stdout));
        Ok((
            Self {
                transport,
                process: Mutex::new(Some(child)),
                stderr_task: Mutex::new(Some(stderr_task)),
            },
            channels,
        ))
    }

    /// Attach to arbitrary IO instead of a spawned process. Used by tests.
    pub fn connect_with_io(stdin: AgentWriter, stdout: AgentReader) -> (Self, AgentChannels) {
        let (transport, channels) = AgentTransport::new(stdin, stdout);
        (
            Self {
                transport,
                process: Mutex::new(None),
                stderr_task: Mutex::new(None),
            },
            channels,
        )
    }

    /// Send a command and await its correlated response payload.
    pub async fn send(&self, command: &AgentCommand) -> Result<Value> {
        if self.is_closed() {
            return Err(AgentError::AgentDown);
        }
        self.transport.send(command).await
    }

    /// True once the agent's stdout has closed (the child exited).
    pub fn is_closed(&self) -> bool {
        self.transport.closed.load(Ordering::SeqCst)
    }

    /// Close stdin, give the agent a moment to exit cleanly, then force-kill.
    pub async fn shutdown(&self) {
        {
            let mut stdin = self.transport.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        if let Some(mut process) = self.process.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, process.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(?status, "pi agent exited");
                }
                _ => {
                    let _ = process.kill().await;
                    let _ = process.wait().await;
                }
            }
        }
        if let Some(task) = self.stderr_task.lock().await.take() {
            task.abort();
        }
    }
}

struct AgentCommandLine {
    program: PathBuf,
    args: Vec<String>,
}

const RPC_ARGS: &[&str] = &["--mode", "rpc"];

fn rpc_args() -> Vec<String> {
    RPC_ARGS.iter().map(|arg| (*arg).to_string()).collect()
}

/// Wrap a resolved path: `.js` entrypoints run through node.
fn command_for_path(path: PathBuf) -> AgentCommandLine {
    if path.extension().is_some_and(|ext| ext == "js") {
        let mut args = vec![path.to_string_lossy().to_string()];
        args.extend(rpc_args());
        AgentCommandLine {
            program: PathBuf::from("node"),
            args,
        }
    } else {
        AgentCommandLine {
            program: path,
            args: rpc_args(),
        }
    }
}

fn common_bin_dirs() -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |path: PathBuf| {
        if seen.insert(path.clone()) {
            dirs_out.push(path);
        }
    };

    if let Some(home) = dirs::home_dir() {
        push(home.join(".local/bin"));
        push(home.join(".local/share/mise/shims"));
        push(home.join(".cargo/bin"));
        push(home.join(".bun/bin"));
        push(home.join(".npm-global/bin"));
        push(home.join("node_modules/.bin"));

        let nvm_root = home.join(".nvm/versions/node");
        if let Ok(entries) = std::fs::read_dir(nvm_root) {
            for entry in entries.flatten() {
                let bin_path = entry.path().join("bin");
                if bin_path.is_dir() {
                    push(bin_path);
                }
            }
        }
    }

    for path in [
        "/opt/homebrew/bin",
        "/usr/local/bin",
        "/usr/bin",
        "/bin",
        "/usr/sbin",
        "/sbin",
    ] {
        push(PathBuf::from(path));
    }

    dirs_out
}

fn find_in_common_bins(binary: &str) -> Option<PathBuf> {
    common_bin_dirs()
        .into_iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

fn resolve_pi_bin_override() -> Option<PathBuf> {
    let value = env::var("PI_BIN").ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = PathBuf::from(trimmed);
    if candidate.is_file() {
        return Some(candidate);
    }
    which::which(trimmed).ok()
}

fn resolve_monorepo_artifact() -> Option<PathBuf> {
    let root = env::var("PI_MONOREPO").ok()?;
    let trimmed = root.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = PathBuf::from(trimmed).join("packages/coding-agent/dist/cli.js");
    candidate.is_file().then_some(candidate)
}

fn resolve_agent_command() -> Option<AgentCommandLine> {
    if let Some(path) = resolve_pi_bin_override() {
        return Some(command_for_path(path));
    }
    if let Some(path) = resolve_monorepo_artifact() {
        return Some(command_for_path(path));
    }
    if let Ok(path) = which::which("pi") {
        return Some(command_for_path(path));
    }
    find_in_common_bins("pi").map(command_for_path)
}

/// Check whether a pi executable can be located on this system.
pub fn is_pi_available() -> bool {
    resolve_pi_bin_override().is_some()
        || resolve_monorepo_artifact().is_some()
        || which::which("pi").is_ok()
        || find_in_common_bins("pi").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_entrypoints_run_through_node() {
        let line = command_for_path(PathBuf::from("/repo/packages/coding-agent/dist/cli.js"));
        assert_eq!(line.program, PathBuf::from("node"));
        assert_eq!(line.args[0], "/repo/packages/coding-agent/dist/cli.js");
        assert_eq!(&line.args[1..], RPC_ARGS);
    }

    #[test]
    fn native_binaries_run_directly() {
        let line = command_for_path(PathBuf::from("/usr/local/bin/pi"));
        assert_eq!(line.program, PathBuf::from("/usr/local/bin/pi"));
        assert_eq!(line.args, RPC_ARGS);
    }

    #[test]
    fn common_bin_dirs_are_unique() {
        let dirs = common_bin_dirs();
        let unique: HashSet<_> = dirs.iter().collect();
        assert_eq!(unique.len(), dirs.len());
    }
}
