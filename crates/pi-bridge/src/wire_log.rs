//! Optional JSONL capture of the outer wire.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Clone, Copy)]
enum WireDirection {
    Inbound,
    Outbound,
}

/// Best-effort wire capture: every line in or out of the bridge is appended
/// to the file named by `PI_BRIDGE_WIRE_LOG` as `{timestamp_ms, direction,
/// raw}`. Never blocks or fails the protocol path.
#[derive(Clone)]
pub struct WireLog {
    tx: mpsc::UnboundedSender<(WireDirection, String)>,
}

impl WireLog {
    pub fn from_env() -> Option<Self> {
        let path = std::env::var("PI_BRIDGE_WIRE_LOG").ok()?;
        if path.trim().is_empty() {
            return None;
        }
        Some(Self::new(PathBuf::from(path)))
    }

    pub fn new(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(WireDirection, String)>();
        tokio::spawn(async move {
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "failed to open wire log");
                    return;
                }
            };

            while let Some((direction, raw)) = rx.recv().await {
                let entry = serde_json::json!({
                    "timestamp_ms": chrono::Utc::now().timestamp_millis(),
                    "direction": match direction {
                        WireDirection::Inbound => "in",
                        WireDirection::Outbound => "out",
                    },
                    "raw": raw,
                });
                let line = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
                let _ = file.write_all(line.as_bytes()).await;
                let _ = file.write_all(b"\n").await;
            }
        });

        Self { tx }
    }

    pub fn log_inbound(&self, raw: &str) {
        let _ = self.tx.send((WireDirection::Inbound, raw.to_string()));
    }

    pub fn log_outbound(&self, raw: &str) {
        let _ = self.tx.send((WireDirection::Outbound, raw.to_string()));
    }
}
