use crate::{
    envelope::{
        AgentEnvelope, AgentIdentity, ConnId, Outbound, PendingConnection, TransportHandle,
        CLOSE_NORMAL,
    },
    error::HubError,
    hub::Hub,
    protocol::{decode_agent_message, AgentMsg, ServerMsg},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-connection state. Only `Registered` carries an envelope the registry
/// knows about.
pub enum ConnectionState {
    Connecting,
    Unregistered(PendingConnection),
    Registered(Arc<AgentEnvelope>),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Connecting,
    Unregistered,
    Registered,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Registered,
    /// A registered agent sent `register` again and its identity was replaced.
    Updated,
    Ignored,
}

/// Drives one agent connection from accept to close.
pub struct ConnectionLifecycle {
    hub: Arc<Hub>,
    id: ConnId,
    handle: Arc<TransportHandle>,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    pub(crate) fn accept(hub: Arc<Hub>) -> (Self, mpsc::Receiver<Outbound>) {
        let id = hub.allocate_id();
        let (handle, rx) = TransportHandle::new(id, hub.config().queue_capacity);
        let handle = Arc::new(handle);
        let mut lifecycle = Self {
            hub,
            id,
            handle,
            state: ConnectionState::Connecting,
        };
        lifecycle.assign_id();
        (lifecycle, rx)
    }

    fn assign_id(&mut self) {
        if let Err(err) = self.handle.send_message(&ServerMsg::AssignId { id: self.id }) {
            warn!(event = "assign_id_failed", conn_id = self.id, error = %err);
        }
        self.state =
            ConnectionState::Unregistered(PendingConnection::new(self.id, self.handle.clone()));
        info!(event = "client_connected", conn_id = self.id);
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn handle(&self) -> &Arc<TransportHandle> {
        &self.handle
    }

    pub fn state(&self) -> StateKind {
        match self.state {
            ConnectionState::Connecting => StateKind::Connecting,
            ConnectionState::Unregistered(_) => StateKind::Unregistered,
            ConnectionState::Registered(_) => StateKind::Registered,
            ConnectionState::Closed => StateKind::Closed,
        }
    }

    pub fn identity(&self) -> Option<&AgentIdentity> {
        match &self.state {
            ConnectionState::Registered(envelope) => Some(envelope.identity()),
            _ => None,
        }
    }

    /// Applies one inbound frame. Errors are per-frame and leave the
    /// connection open in its current state.
    pub async fn handle_inbound(&mut self, data: &[u8]) -> Result<Inbound, HubError> {
        let payload = match decode_agent_message(data, self.hub.config().max_message_bytes)? {
            AgentMsg::Register(payload) => payload,
            AgentMsg::Other { action } => {
                debug!(event = "message_ignored", conn_id = self.id, action = %action);
                return Ok(Inbound::Ignored);
            }
        };

        if let Some(claimed) = payload.id {
            if claimed != self.id {
                return Err(HubError::malformed(format!(
                    "register claims id {claimed} but connection was assigned {}",
                    self.id
                )));
            }
        }
        if !self.handle.is_open() {
            debug!(event = "register_on_closing", conn_id = self.id);
            return Ok(Inbound::Ignored);
        }

        let (envelope, outcome) = match &self.state {
            ConnectionState::Unregistered(pending) => {
                let envelope = Arc::new(pending.register(payload.into()));
                self.hub.registry().insert(self.id, envelope.clone()).await?;
                (envelope, Inbound::Registered)
            }
            ConnectionState::Registered(current) => {
                let envelope = Arc::new(current.with_identity(payload.into()));
                self.hub.registry().replace(self.id, envelope.clone()).await?;
                (envelope, Inbound::Updated)
            }
            ConnectionState::Connecting | ConnectionState::Closed => {
                return Ok(Inbound::Ignored);
            }
        };

        let identity = envelope.identity();
        let event = match outcome {
            Inbound::Updated => "client_reregistered",
            _ => "client_registered",
        };
        info!(
            event,
            conn_id = self.id,
            user_id = %identity.user_id,
            username = %identity.username,
            job_id = %identity.job_id,
            game_name = %identity.game_name
        );
        self.state = ConnectionState::Registered(envelope);
        Ok(outcome)
    }

    /// Tears the connection down from any state. Safe to call more than once.
    pub async fn close(&mut self, reason: &str) {
        if matches!(self.state, ConnectionState::Closed) {
            return;
        }
        let was_registered = matches!(self.state, ConnectionState::Registered(_));
        self.handle.close(CLOSE_NORMAL, reason);
        self.hub.registry().remove(self.id).await;
        self.state = ConnectionState::Closed;
        info!(
            event = "client_disconnected",
            conn_id = self.id,
            registered = was_registered,
            reason = reason
        );
    }
}
