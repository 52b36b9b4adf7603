// Connection router implementation
use std::sync::Arc;

use tracing::debug;

use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::{CourierError, Result};

/// Resolves the outbound connection for a send from an optional lookup key.
///
/// No key means the registry's default handle. A key that is registered
/// resolves to its handle. A key that is not registered is an error: callers
/// who name a connection expect a deterministic one, and falling back to the
/// default would hide misconfiguration.
#[derive(Clone)]
pub struct ConnectionRouter {
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn resolve(&self, key: Option<&str>) -> Result<Arc<ConnectionHandle>> {
        match key {
            None => {
                let handle = self.registry.default_handle();
                debug!(connection = %handle.id, "Resolved default connection");
                Ok(handle)
            }
            Some(key) => match self.registry.lookup(key) {
                Some(handle) => {
                    debug!(key = %key, connection = %handle.id, "Resolved connection");
                    Ok(handle)
                }
                None => Err(CourierError::UnknownConnectionKey(key.to_string())),
            },
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
