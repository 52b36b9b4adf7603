use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::info;

/// An established broker connection as seen by the client core.
///
/// Handles are owned by the [`ConnectionRegistry`] from registration until
/// removal; callers only ever borrow them through an `Arc`. The transport
/// collaborator guarantees a handle is safe to publish on from any task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: String,
    pub uri: String,
    pub metadata: HashMap<String, String>,
}

impl ConnectionHandle {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Concurrent routing table: lookup key to connection handle, plus a default
/// handle that is always present.
///
/// Mutation entry points (`register`, `unregister`, `set_default`) are used
/// by deployment and config tooling; lookups happen on every send. Reads see
/// either the old or the new mapping under concurrent mutation, never a torn
/// state.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ConnectionHandle>>,
    default_handle: RwLock<Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// The default handle is required up front so resolution without a key
    /// can never come up empty.
    pub fn new(default_handle: ConnectionHandle) -> Self {
        Self {
            connections: DashMap::new(),
            default_handle: RwLock::new(Arc::new(default_handle)),
        }
    }

    /// Bind a lookup key to a handle; a later registration with the same key
    /// replaces the previous one.
    pub fn register(&self, key: impl Into<String>, handle: ConnectionHandle) {
        let key = key.into();
        info!(key = %key, connection = %handle.id, "Registering connection");
        self.connections.insert(key, Arc::new(handle));
    }

    /// Remove a binding. Returns false when the key was not registered.
    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.connections.remove(key).is_some();
        if removed {
            info!(key = %key, "Unregistered connection");
        }
        removed
    }

    pub fn set_default(&self, handle: ConnectionHandle) {
        info!(connection = %handle.id, "Setting default connection");
        let handle = Arc::new(handle);
        match self.default_handle.write() {
            Ok(mut guard) => *guard = handle,
            Err(poisoned) => *poisoned.into_inner() = handle,
        }
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn default_handle(&self) -> Arc<ConnectionHandle> {
        match self.default_handle.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
