//! Connection manager: owns live handler instances and the active pointer.
//!
//! All mutable registry state lives behind one async lock so mutations are
//! serialised and readers never observe half-updated state. The manager
//! structurally enforces the single-active invariant: the active pointer is
//! one `Option<String>`, not a per-entry flag.

use crate::connection::{store, ConnectionConfig, ConnectionState};
use crate::error::{AskdbError, Result};
use crate::handler::{make_handler, DataHandler, QueryResult, SchemaSnapshot, TestResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

struct Entry {
    config: ConnectionConfig,
    handler: Option<Arc<dyn DataHandler>>,
    state: ConnectionState,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    active_id: Option<String>,
}

/// Read-only view of one managed connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    /// The stored configuration.
    #[serde(flatten)]
    pub config: ConnectionConfig,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Whether this is the active connection.
    pub active: bool,
}

/// Manages connection configs, their live handlers, and the active pointer.
pub struct ConnectionManager {
    inner: RwLock<Inner>,
    store_path: Option<PathBuf>,
}

impl ConnectionManager {
    /// Creates an empty, non-persisting manager.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            store_path: None,
        }
    }

    /// Creates a manager backed by a connections file, loading existing
    /// configs into the `configured` state.
    pub fn with_store(path: PathBuf) -> Result<Self> {
        let configs = store::load(&path)?;
        let mut inner = Inner::default();
        for config in configs {
            let id = config.id.clone();
            inner.entries.insert(
                id,
                Entry {
                    config,
                    handler: None,
                    state: ConnectionState::Configured,
                },
            );
        }
        info!(
            count = inner.entries.len(),
            path = %path.display(),
            "loaded connection registry"
        );
        Ok(Self {
            inner: RwLock::new(inner),
            store_path: Some(path),
        })
    }

    /// Registers a pre-built handler as a connected, active connection.
    ///
    /// Used by embedders and tests that bring their own handler instance.
    pub async fn install(&self, config: ConnectionConfig, handler: Arc<dyn DataHandler>) {
        let mut inner = self.inner.write().await;
        let id = config.id.clone();
        inner.entries.insert(
            id.clone(),
            Entry {
                config,
                handler: Some(handler),
                state: ConnectionState::Connected,
            },
        );
        inner.active_id = Some(id);
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        if let Some(path) = &self.store_path {
            let configs: Vec<ConnectionConfig> =
                inner.entries.values().map(|e| e.config.clone()).collect();
            store::save(path, &configs)?;
        }
        Ok(())
    }

    /// Validates and stores a new connection config. Fails with
    /// `DuplicateId` when the id exists.
    pub async fn create(&self, config: ConnectionConfig) -> Result<String> {
        // Full factory validation, including UnsupportedKind.
        make_handler(&config)?;

        let mut inner = self.inner.write().await;
        let id = config.id.clone();
        if inner.entries.contains_key(&id) {
            return Err(AskdbError::DuplicateId(id));
        }
        inner.entries.insert(
            id.clone(),
            Entry {
                config,
                handler: None,
                state: ConnectionState::Configured,
            },
        );
        self.persist(&inner)?;
        Ok(id)
    }

    /// Replaces a stored config. A live handler for the old config is torn
    /// down and the entry returns to `configured`.
    pub async fn update(&self, config: ConnectionConfig) -> Result<()> {
        make_handler(&config)?;

        let old_handler = {
            let mut inner = self.inner.write().await;
            let id = config.id.clone();
            if !inner.entries.contains_key(&id) {
                return Err(AskdbError::NotFound(id));
            }
            let old = {
                let entry = inner.entries.get_mut(&id).expect("presence checked above");
                let old = entry.handler.take();
                entry.config = config;
                entry.state = ConnectionState::Configured;
                old
            };
            if inner.active_id.as_deref() == Some(id.as_str()) {
                inner.active_id = None;
            }
            self.persist(&inner)?;
            old
        };
        if let Some(handler) = old_handler {
            handler.disconnect().await;
        }
        Ok(())
    }

    /// Builds a handler for the config and runs a cheap round-trip. Does not
    /// persist anything.
    pub async fn test(&self, config: &ConnectionConfig) -> Result<TestResult> {
        let handler = make_handler(config)?;
        Ok(handler.test().await)
    }

    /// Connects the target and makes it the active connection, demoting any
    /// previously active connection (which stays connected). Idempotent for
    /// an already-active id.
    pub async fn activate(&self, id: &str) -> Result<()> {
        // Serialise the whole transition; concurrent activates must not
        // interleave between the connect and the pointer swap.
        let mut inner = self.inner.write().await;

        if inner.active_id.as_deref() == Some(id) {
            return Ok(());
        }

        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| AskdbError::NotFound(id.to_string()))?;

        let handler = match &entry.handler {
            Some(handler) => handler.clone(),
            None => {
                let handler = make_handler(&entry.config)?;
                entry.handler = Some(handler.clone());
                handler
            }
        };

        entry.state = ConnectionState::Connecting;
        match handler.connect().await {
            Ok(()) => {
                let entry = inner.entries.get_mut(id).expect("entry exists");
                entry.state = ConnectionState::Connected;
                inner.active_id = Some(id.to_string());
                info!(id, "connection activated");
                Ok(())
            }
            Err(e) => {
                let entry = inner.entries.get_mut(id).expect("entry exists");
                entry.state = ConnectionState::Configured;
                entry.handler = None;
                warn!(id, error = %e, "activation failed");
                Err(e)
            }
        }
    }

    /// Clears the active flag; the connection stays connected.
    pub async fn deactivate(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if inner.active_id.as_deref() == Some(id) {
            inner.active_id = None;
        }
    }

    /// Tears down the handler and deletes the entry. Idempotent; removing
    /// the active connection deactivates it first.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let handler = {
            let mut inner = self.inner.write().await;
            if inner.active_id.as_deref() == Some(id) {
                inner.active_id = None;
            }
            let handler = inner.entries.remove(id).and_then(|mut e| e.handler.take());
            self.persist(&inner)?;
            handler
        };
        if let Some(handler) = handler {
            handler.disconnect().await;
        }
        Ok(())
    }

    /// Returns the id of the active connection, if any.
    pub async fn active(&self) -> Option<String> {
        self.inner.read().await.active_id.clone()
    }

    /// Returns a snapshot of every managed connection.
    pub async fn list(&self) -> Vec<ConnectionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .map(|entry| ConnectionSnapshot {
                config: entry.config.clone(),
                state: entry.state,
                active: inner.active_id.as_deref() == Some(entry.config.id.as_str()),
            })
            .collect()
    }

    /// Returns the stored config for an id.
    pub async fn config(&self, id: &str) -> Result<ConnectionConfig> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(id)
            .map(|e| e.config.clone())
            .ok_or_else(|| AskdbError::NotFound(id.to_string()))
    }

    /// Resolves an id (or the active connection when `None`) to its live
    /// handler. Fails with `NotConnected` when the target has no handler.
    pub async fn handler(&self, id: Option<&str>) -> Result<(String, Arc<dyn DataHandler>)> {
        let inner = self.inner.read().await;
        let id = match id {
            Some(id) => id.to_string(),
            None => inner
                .active_id
                .clone()
                .ok_or_else(|| AskdbError::not_connected("no active connection"))?,
        };
        let entry = inner
            .entries
            .get(&id)
            .ok_or_else(|| AskdbError::NotFound(id.clone()))?;
        match (&entry.handler, entry.state) {
            (Some(handler), ConnectionState::Connected) => Ok((id, handler.clone())),
            _ => Err(AskdbError::not_connected(id)),
        }
    }

    /// Delegates schema introspection to the connection's handler.
    pub async fn schema(&self, id: &str, include_columns: bool) -> Result<SchemaSnapshot> {
        let (_, handler) = self.handler(Some(id)).await?;
        handler.schema(include_columns).await
    }

    /// Delegates query execution to the connection's handler.
    pub async fn execute(
        &self,
        id: &str,
        query: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<QueryResult> {
        let (_, handler) = self.handler(Some(id)).await?;
        Ok(handler.execute(query, params).await)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
