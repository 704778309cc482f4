use anyhow::Context;
use script_hub_rs::{build_router, config::load_config, logging::init_logging, AppState};
use std::net::SocketAddr;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    let log_file = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return Err(err).with_context(|| format!("invalid listen address '{}'", config.addr));
        }
    };

    let state = AppState::new(config.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        event = "hub_start",
        addr = %addr,
        ws = %format!("ws://{addr}/ws"),
        ping_interval_secs = config.ping_interval.as_secs(),
        queue_capacity = config.queue_capacity,
        log_file = ?log_file
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server error")?;

    info!(event = "hub_stop");
    Ok(())
}
