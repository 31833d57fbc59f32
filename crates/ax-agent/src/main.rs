//! Sandboxed agent entry point.
//!
//! Invoked by the host's sandbox provider with the turn payload on stdin
//! and its wiring in environment variables. Assistant text streams to
//! stdout; diagnostics go to stderr so the host can separate them.

use anyhow::Context;
use ax_agent::{AgentInput, AgentRunner, RunnerConfig};
use tokio::io::AsyncReadExt;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ax_agent=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = RunnerConfig::from_env().map_err(anyhow::Error::msg)?;

    // When the host hands us a proxy socket, stand up the TCP bridge and
    // point the model client at it; the SDK then speaks plain HTTP to
    // 127.0.0.1 and never handles a credential.
    let mut bridge = None;
    if let Ok(proxy_socket) = std::env::var("AX_PROXY_SOCKET") {
        let mut b = ax_proxy::Bridge::bind(proxy_socket.into())
            .await
            .context("binding model bridge")?;
        config.model_base_url = format!("http://127.0.0.1:{}", b.port());
        let _accept_loop = b.start();
        bridge = Some(b);
    }

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("reading stdin payload")?;
    let input = AgentInput::parse(&raw);

    let mut runner = AgentRunner::connect(config)
        .await
        .map_err(anyhow::Error::msg)?;
    let usage = runner.run(input).await.map_err(anyhow::Error::msg)?;

    tracing::info!(
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "Turn complete"
    );
    if let Some(bridge) = bridge {
        bridge.stop();
    }
    Ok(())
}
