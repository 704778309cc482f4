//! Connection registry and command dispatch for the script hub.
//!
//! Agents (game clients) connect, receive an id, register their identity and
//! become addressable by operators. Everything here is transport-agnostic:
//! a connection is seen only through its outbound frame queue.

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod protocol;
pub mod registry;

pub use dispatch::{DispatchResult, Dispatcher, Target};
pub use envelope::{
    AgentEnvelope, AgentIdentity, AgentSummary, CloseSignal, ConnId, Outbound, TransportHandle,
};
pub use error::HubError;
pub use hub::{CommandOutcome, Hub, HubConfig, KICK_COMMAND};
pub use lifecycle::{ConnectionLifecycle, Inbound, StateKind};
pub use registry::Registry;
