//! Connection + link-id bookkeeping shared by async components (spec §3
//! "Connection", §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::Connection;

/// Tracks every currently-open connection a component owns, plus the
/// stable link-id bindings steps use to target one later
/// (`sendEvent(linkId, ...)`, `disconnect(linkId)`, ...).
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Arc<dyn Connection>>>,
    links: Mutex<HashMap<String, String>>,
}

impl ConnectionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly established connection.
    pub fn insert(&self, connection: Arc<dyn Connection>) {
        self.connections.lock().insert(connection.id().to_string(), connection);
    }

    /// Drop a connection (and any link id bound to it) once it closes.
    pub fn remove(&self, connection_id: &str) {
        self.connections.lock().remove(connection_id);
        self.links.lock().retain(|_, bound_id| bound_id != connection_id);
    }

    /// Look up a tracked connection by its stable id.
    pub fn get(&self, connection_id: &str) -> Option<Arc<dyn Connection>> {
        self.connections.lock().get(connection_id).cloned()
    }

    /// Bind `link_id` to `connection_id`, overwriting any prior binding.
    pub fn bind_link(&self, link_id: impl Into<String>, connection_id: impl Into<String>) {
        self.links.lock().insert(link_id.into(), connection_id.into());
    }

    /// Resolve a link id to its currently bound connection, if any and if
    /// that connection is still tracked (spec §4.6 `sendEvent`/`disconnect`).
    pub fn resolve_link(&self, link_id: &str) -> Option<Arc<dyn Connection>> {
        let connection_id = self.links.lock().get(link_id).cloned()?;
        self.get(&connection_id)
    }

    /// Every link id currently bound to `connection_id` (spec §4.6
    /// `onDisconnect(linkId, ...)`/`waitDisconnect(linkId)`, looked up before
    /// the connection is dropped from the registry).
    pub fn links_for(&self, connection_id: &str) -> Vec<String> {
        self.links.lock().iter().filter(|(_, bound)| bound.as_str() == connection_id).map(|(link, _)| link.clone()).collect()
    }

    /// Every currently tracked connection (spec §4.6 `broadcast`).
    pub fn all(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
