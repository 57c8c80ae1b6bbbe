use crate::client::{Connection, Shared, StatusSnapshot};
use crate::error::{Result, WsError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

type Connections = RwLock<HashMap<String, Connection>>;

/// Injectable name → connection table
///
/// Cloning shares the same table. Entries are removed by the owning
/// connection task when it exits, through the [`RegistrationGuard`] it holds.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Connections>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `name`
    ///
    /// # Errors
    /// `Configuration` when the name is already taken by a live connection.
    pub fn register(&self, name: &str, connection: Connection) -> Result<RegistrationGuard> {
        let mut connections = self.connections.write();
        if connections.contains_key(name) {
            return Err(WsError::Configuration(format!(
                "connection '{}' is already registered",
                name
            )));
        }
        let shared = connection.shared();
        connections.insert(name.to_string(), connection);
        debug!(connection = name, "Registered connection");

        Ok(RegistrationGuard {
            name: name.to_string(),
            shared,
            connections: Arc::downgrade(&self.connections),
        })
    }

    /// Remove an entry; returns whether it existed
    pub fn deregister(&self, name: &str) -> bool {
        self.connections.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Connection> {
        self.connections.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Status snapshot of every registered connection
    pub fn statuses(&self) -> HashMap<String, StatusSnapshot> {
        self.connections
            .read()
            .iter()
            .map(|(name, connection)| (name.clone(), connection.status()))
            .collect()
    }

    /// Close every registered connection
    pub async fn close_all(&self) {
        let connections: Vec<Connection> = self.connections.read().values().cloned().collect();
        info!(count = connections.len(), "Closing all connections");

        for connection in connections {
            if let Err(e) = connection.close().await {
                warn!(connection = connection.name(), "Error while closing: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.list())
            .finish()
    }
}

/// Removes a registry entry when dropped
///
/// Only the entry for the same connection is removed, so a name that was
/// re-registered in the meantime is left alone.
pub struct RegistrationGuard {
    name: String,
    // Identity only; must never hold the task's own command sender
    shared: Arc<Shared>,
    connections: Weak<Connections>,
}

impl RegistrationGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let Some(connections) = self.connections.upgrade() else {
            return;
        };
        let mut connections = connections.write();
        let same = connections
            .get(&self.name)
            .map_or(false, |registered| Arc::ptr_eq(&registered.shared(), &self.shared));
        if same {
            connections.remove(&self.name);
            debug!(connection = %self.name, "Deregistered connection");
        }
    }
}
