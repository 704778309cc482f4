use crate::{
    envelope::{AgentEnvelope, ConnId, Outbound},
    protocol::{encode_message, ServerMsg},
    registry::Registry,
};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{debug, error, info, warn};

const ALL_TARGETS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Agent(ConnId),
    All,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Agent(id) => write!(f, "{id}"),
            Target::All => f.write_str(ALL_TARGETS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTarget(pub String);

impl fmt::Display for InvalidTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid target '{}'", self.0)
    }
}

impl std::error::Error for InvalidTarget {}

impl FromStr for Target {
    type Err = InvalidTarget;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let cleaned = value.trim();
        if cleaned == ALL_TARGETS {
            return Ok(Target::All);
        }
        cleaned
            .parse::<ConnId>()
            .map(Target::Agent)
            .map_err(|_| InvalidTarget(value.to_string()))
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TargetVisitor;

        impl<'de> Visitor<'de> for TargetVisitor {
            type Value = Target;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("\"all\" or a connection id as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Target::Agent(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "connection id cannot be negative: {value}"
                    )));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse::<Target>().map_err(E::custom)
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(TargetVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    NotFound,
    Delivered { count: usize },
}

/// Fire-and-forget command delivery to registered agents.
///
/// Never mutates the registry and never waits on an agent. A stale or closing
/// connection is reported exactly like an absent one.
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, target: Target, command: &str, params: &Value) -> DispatchResult {
        match self.deliver(target, command, params).await {
            Some(delivered) => DispatchResult::Delivered {
                count: delivered.len(),
            },
            None => DispatchResult::NotFound,
        }
    }

    /// Writes the command frame to the target(s) and returns the envelopes
    /// that accepted it, or `None` when a single target is not reachable.
    pub(crate) async fn deliver(
        &self,
        target: Target,
        command: &str,
        params: &Value,
    ) -> Option<Vec<Arc<AgentEnvelope>>> {
        let frame = match encode_message(&ServerMsg::Command {
            command: command.to_string(),
            params: params.clone(),
        }) {
            Ok(value) => value,
            Err(err) => {
                error!(event = "dispatch_encode_error", target = %target, error = %err);
                return match target {
                    Target::Agent(_) => None,
                    Target::All => Some(Vec::new()),
                };
            }
        };

        let delivered = match target {
            Target::Agent(id) => {
                let envelope = self.registry.get(id).await?;
                if !write_frame(&envelope, &frame) {
                    info!(event = "dispatch_miss", conn_id = id, command = command);
                    return None;
                }
                vec![envelope]
            }
            Target::All => {
                let mut delivered = Vec::new();
                for envelope in self.registry.snapshot().await {
                    if write_frame(&envelope, &frame) {
                        delivered.push(envelope);
                    }
                }
                delivered
            }
        };

        info!(
            event = "dispatch",
            target = %target,
            command = command,
            delivered = delivered.len()
        );
        Some(delivered)
    }
}

fn write_frame(envelope: &AgentEnvelope, frame: &str) -> bool {
    let handle = envelope.handle();
    if !handle.is_open() {
        debug!(event = "dispatch_skip_closed", conn_id = envelope.id());
        return false;
    }
    match handle.send(Outbound::Text(frame.to_string())) {
        Ok(()) => true,
        Err(err) => {
            warn!(event = "send_error", conn_id = envelope.id(), error = %err);
            false
        }
    }
}
