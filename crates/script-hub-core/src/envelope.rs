use crate::{
    error::HubError,
    protocol::{encode_message, RegisterPayload, ServerMsg},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};

pub type ConnId = u64;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

/// Shared closing flag of one connection.
///
/// Cloned into the writer task so it can follow the connection's state
/// without holding the queue sender.
#[derive(Clone)]
pub struct CloseSignal {
    closing: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            closing: Arc::new(closing),
        }
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Flags the connection as closing. Returns `false` if it already was.
    pub fn mark(&self) -> bool {
        self.mark_with(|| {})
    }

    /// Runs `before` under the flag's lock, then flips it, only if this call
    /// is the first to close. Waiters never observe the flag before `before`
    /// has run.
    fn mark_with(&self, before: impl FnOnce()) -> bool {
        self.closing.send_if_modified(|closing| {
            if *closing {
                return false;
            }
            before();
            *closing = true;
            true
        })
    }

    /// Resolves once the connection has started closing.
    pub async fn closed(&self) {
        let mut rx = self.closing.subscribe();
        let _ = rx.wait_for(|closing| *closing).await;
    }
}

/// Write side of one agent connection.
///
/// Frames go through a bounded queue owned by the connection's writer task, so
/// a send never waits on the socket. The closing flag is set exactly once, by
/// whichever path gets there first: operator kick, agent disconnect, write
/// failure or a full queue.
pub struct TransportHandle {
    conn_id: ConnId,
    sender: mpsc::Sender<Outbound>,
    signal: CloseSignal,
}

impl TransportHandle {
    pub fn new(conn_id: ConnId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                conn_id,
                sender,
                signal: CloseSignal::new(),
            },
            receiver,
        )
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn close_signal(&self) -> CloseSignal {
        self.signal.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.signal.is_closing() && !self.sender.is_closed()
    }

    pub fn send(&self, frame: Outbound) -> Result<(), HubError> {
        if !self.is_open() {
            return Err(self.write_failure("closed"));
        }
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.mark_closing();
                Err(self.write_failure("queue_full"))
            }
            Err(TrySendError::Closed(_)) => {
                self.mark_closing();
                Err(self.write_failure("closed"))
            }
        }
    }

    pub fn send_message(&self, msg: &ServerMsg) -> Result<(), HubError> {
        let text = encode_message(msg)?;
        self.send(Outbound::Text(text))
    }

    /// Starts closing the connection. Returns `false` if another path already did.
    ///
    /// The close frame is queued before the flag flips, so a writer woken by
    /// the flag finds it in the queue.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.signal.mark_with(|| {
            let _ = self.sender.try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        })
    }

    /// Flags the handle as closing without queueing a close frame.
    pub fn mark_closing(&self) -> bool {
        self.signal.mark()
    }

    pub async fn closed(&self) {
        self.signal.closed().await
    }

    fn write_failure(&self, reason: &'static str) -> HubError {
        HubError::TransportWriteFailure {
            conn_id: self.conn_id,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub user_id: String,
    pub username: String,
    pub job_id: String,
    pub game_name: String,
}

impl From<RegisterPayload> for AgentIdentity {
    fn from(payload: RegisterPayload) -> Self {
        Self {
            user_id: payload.user_id,
            username: payload.username,
            job_id: payload.job_id,
            game_name: payload.game_name,
        }
    }
}

/// Operator-facing view of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: ConnId,
    pub user_id: String,
    pub username: String,
    pub job_id: String,
    pub game_name: String,
    pub connected_at: DateTime<Utc>,
}

/// A connection that has been assigned an id but has not registered yet.
pub struct PendingConnection {
    id: ConnId,
    handle: Arc<TransportHandle>,
    connected_at: DateTime<Utc>,
}

impl PendingConnection {
    pub(crate) fn new(id: ConnId, handle: Arc<TransportHandle>) -> Self {
        Self {
            id,
            handle,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn handle(&self) -> &Arc<TransportHandle> {
        &self.handle
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub(crate) fn register(&self, identity: AgentIdentity) -> AgentEnvelope {
        AgentEnvelope {
            id: self.id,
            identity,
            connected_at: self.connected_at,
            handle: self.handle.clone(),
        }
    }
}

/// A registered agent. Only this type can be stored in the registry.
pub struct AgentEnvelope {
    id: ConnId,
    identity: AgentIdentity,
    connected_at: DateTime<Utc>,
    handle: Arc<TransportHandle>,
}

impl AgentEnvelope {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn handle(&self) -> &TransportHandle {
        &self.handle
    }

    /// Same connection under a new identity, for agents that register again.
    pub(crate) fn with_identity(&self, identity: AgentIdentity) -> AgentEnvelope {
        AgentEnvelope {
            id: self.id,
            identity,
            connected_at: self.connected_at,
            handle: self.handle.clone(),
        }
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id,
            user_id: self.identity.user_id.clone(),
            username: self.identity.username.clone(),
            job_id: self.identity.job_id.clone(),
            game_name: self.identity.game_name.clone(),
            connected_at: self.connected_at,
        }
    }
}
