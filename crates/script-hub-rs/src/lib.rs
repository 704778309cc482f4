pub mod api;
pub mod config;
pub mod logging;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use config::Config;
use script_hub_core::Hub;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(Hub::new(config.hub_config())),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/clients", get(api::list_clients))
        .route("/api/send-command", post(api::send_command))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}
