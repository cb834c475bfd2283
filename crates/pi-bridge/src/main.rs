use anyhow::Result;

use pi_bridge::bridge::{Bridge, BridgeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging goes to stderr; stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pi_bridge=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("starting pi-bridge v{}", env!("CARGO_PKG_VERSION"));

    if !pi_client::is_pi_available() {
        tracing::warn!(
            "no pi executable found; set PI_BIN or PI_MONOREPO, or install pi on PATH"
        );
    }

    let bridge = Bridge::new(tokio::io::stdout(), BridgeConfig::from_env());

    tokio::select! {
        result = bridge.run(tokio::io::stdin()) => {
            bridge.shutdown().await;
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("termination signal received");
            bridge.shutdown().await;
        }
    }

    tracing::info!("pi-bridge shutting down");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
