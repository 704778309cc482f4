use crate::{
    envelope::{AgentEnvelope, AgentSummary, ConnId},
    error::HubError,
};
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::RwLock;
use tracing::{debug, error};

struct RegistryEntry {
    seq: u64,
    envelope: Arc<AgentEnvelope>,
}

/// Directory of registered, dispatch-eligible agents keyed by connection id.
///
/// Only registered envelopes are ever inserted, so everything reachable from
/// here is a valid dispatch target. Locks are held for map operations only;
/// callers get cloned `Arc`s and write to transports after the lock is gone.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<ConnId, RegistryEntry>>,
    insert_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: ConnId, envelope: Arc<AgentEnvelope>) -> Result<(), HubError> {
        if envelope.id() != id {
            let detail = format!("envelope {} inserted under id {id}", envelope.id());
            error!(event = "registry_invariant", conn_id = id, detail = %detail);
            return Err(HubError::InternalInvariantViolation(detail));
        }
        let mut entries = self.entries.write().await;
        match entries.entry(id) {
            Entry::Occupied(_) => {
                let detail = format!("connection id {id} already registered");
                error!(event = "registry_invariant", conn_id = id, detail = %detail);
                Err(HubError::InternalInvariantViolation(detail))
            }
            Entry::Vacant(slot) => {
                let seq = self.insert_seq.fetch_add(1, Ordering::SeqCst);
                slot.insert(RegistryEntry { seq, envelope });
                debug!(event = "registry_insert", conn_id = id, size = entries.len());
                Ok(())
            }
        }
    }

    /// Swaps the envelope stored under `id`, keeping its place in the listing.
    pub async fn replace(&self, id: ConnId, envelope: Arc<AgentEnvelope>) -> Result<(), HubError> {
        if envelope.id() != id {
            let detail = format!("envelope {} replaced under id {id}", envelope.id());
            error!(event = "registry_invariant", conn_id = id, detail = %detail);
            return Err(HubError::InternalInvariantViolation(detail));
        }
        match self.entries.write().await.get_mut(&id) {
            Some(entry) => {
                entry.envelope = envelope;
                debug!(event = "registry_replace", conn_id = id);
                Ok(())
            }
            None => Err(HubError::TargetNotFound(format!("connection {id} is not registered"))),
        }
    }

    /// Removes the entry if present. Removing an absent id is a no-op.
    pub async fn remove(&self, id: ConnId) -> Option<Arc<AgentEnvelope>> {
        let removed = self.entries.write().await.remove(&id);
        if removed.is_some() {
            debug!(event = "registry_remove", conn_id = id);
        }
        removed.map(|entry| entry.envelope)
    }

    pub async fn get(&self, id: ConnId) -> Option<Arc<AgentEnvelope>> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.envelope.clone())
    }

    /// Point-in-time summaries in registration order.
    pub async fn list_all(&self) -> impl Iterator<Item = AgentSummary> {
        self.snapshot()
            .await
            .into_iter()
            .map(|envelope| envelope.summary())
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Point-in-time envelopes in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<AgentEnvelope>> {
        let mut entries = {
            let entries = self.entries.read().await;
            entries
                .values()
                .map(|entry| (entry.seq, entry.envelope.clone()))
                .collect::<Vec<_>>()
        };
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, envelope)| envelope).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
