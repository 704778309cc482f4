use crate::{
    dispatch::{DispatchResult, Dispatcher, Target},
    envelope::{AgentSummary, ConnId, Outbound, CLOSE_NORMAL},
    lifecycle::ConnectionLifecycle,
    protocol::DEFAULT_MAX_MESSAGE_BYTES,
    registry::Registry,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tracing::info;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const KICK_COMMAND: &str = "kick";
const DEFAULT_KICK_REASON: &str = "kicked";

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub queue_capacity: usize,
    pub max_message_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Operator-facing result of a command request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn from_dispatch(target: Target, result: DispatchResult) -> Self {
        match (target, result) {
            (_, DispatchResult::NotFound) => Self::failed("Client not found or disconnected"),
            (Target::Agent(id), DispatchResult::Delivered { .. }) => {
                Self::ok(format!("Command sent to client {id}"))
            }
            (Target::All, DispatchResult::Delivered { count }) => {
                Self::ok(format!("Command sent to {count} clients"))
            }
        }
    }
}

/// Process-wide server state: id allocator, registry and dispatcher.
pub struct Hub {
    config: HubConfig,
    conn_counter: AtomicU64,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn allocate_id(&self) -> ConnId {
        self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Starts the lifecycle of a freshly accepted transport. The receiver
    /// feeds the connection's writer task and already holds the `assignId`
    /// frame.
    pub fn accept(self: &Arc<Self>) -> (ConnectionLifecycle, mpsc::Receiver<Outbound>) {
        ConnectionLifecycle::accept(self.clone())
    }

    pub async fn list_connections(&self) -> Vec<AgentSummary> {
        self.registry.list_all().await.collect()
    }

    pub async fn dispatch(&self, target: Target, command: &str, params: &Value) -> DispatchResult {
        self.dispatcher.dispatch(target, command, params).await
    }

    /// Delivers `kick` like any other command, then closes every delivered
    /// connection and drops it from the registry.
    pub async fn kick(&self, target: Target, params: &Value) -> DispatchResult {
        let Some(delivered) = self.dispatcher.deliver(target, KICK_COMMAND, params).await else {
            return DispatchResult::NotFound;
        };
        let reason = params
            .get("message")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_KICK_REASON);
        for envelope in &delivered {
            envelope.handle().close(CLOSE_NORMAL, reason);
            self.registry.remove(envelope.id()).await;
            info!(event = "client_kicked", conn_id = envelope.id(), reason = reason);
        }
        DispatchResult::Delivered {
            count: delivered.len(),
        }
    }

    pub async fn send_command(&self, target: Target, command: &str, params: &Value) -> CommandOutcome {
        let result = if command == KICK_COMMAND {
            self.kick(target, params).await
        } else {
            self.dispatch(target, command, params).await
        };
        CommandOutcome::from_dispatch(target, result)
    }
}
