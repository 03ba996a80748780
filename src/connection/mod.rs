//! Connection configuration and lifecycle management.
//!
//! A `ConnectionConfig` is an immutable record identifying a backend and the
//! fields needed to reach it; the `ConnectionManager` owns the live handler
//! instances built from those records.

pub mod manager;
pub mod store;

pub use manager::{ConnectionManager, ConnectionSnapshot};

use crate::error::{AskdbError, Result};
use crate::handler::{describe_fields, BackendKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable configuration record for one connection.
///
/// Backend-specific fields (host, port, credentials, file path, base URL…)
/// are carried as a flat map so the persisted JSON record matches the field
/// schema announced by `describe_fields`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Unique id across the registry.
    pub id: String,

    /// Human-readable display name.
    pub name: String,

    /// Backend kind tag.
    pub kind: BackendKind,

    /// Backend-specific fields, flattened into the record.
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl ConnectionConfig {
    /// Creates a config with no backend-specific fields set.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            options: BTreeMap::new(),
        }
    }

    /// Sets a backend-specific field (builder style).
    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Returns a field as a string, accepting string or numeric JSON values.
    pub fn opt_str(&self, key: &str) -> Option<String> {
        match self.options.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Returns a required field as a string.
    pub fn require_str(&self, key: &str) -> Result<String> {
        self.opt_str(key).ok_or_else(|| {
            AskdbError::config_invalid(format!("field '{key}' is required and missing"))
        })
    }

    /// Returns the port field, falling back to the backend's default.
    pub fn port(&self) -> Option<u16> {
        match self.options.get("port") {
            Some(serde_json::Value::Number(n)) => n.as_u64().map(|p| p as u16),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => self.kind.default_port(),
        }
    }

    /// Returns a boolean field, defaulting to false.
    pub fn opt_bool(&self, key: &str) -> bool {
        matches!(self.options.get(key), Some(serde_json::Value::Bool(true)))
            || matches!(
                self.options.get(key),
                Some(serde_json::Value::String(s)) if s == "true"
            )
    }

    /// Validates the config against its kind's field schema.
    ///
    /// Checks that the kind is in the supported set and that every field the
    /// kind requires is present and non-empty. Port defaults count as present.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AskdbError::config_invalid("connection id must not be empty"));
        }

        let mut missing = Vec::new();
        for field in describe_fields(self.kind) {
            if !field.required {
                continue;
            }
            let satisfied = match field.name {
                "port" => self.port().is_some(),
                name => self.opt_str(name).is_some(),
            };
            if !satisfied && field.default.is_none() {
                missing.push(field.name);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AskdbError::missing_fields(self.kind.as_str(), &missing))
        }
    }
}

/// Lifecycle state of a managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Stored and validated, no live handler.
    Configured,
    /// Handler connect in flight.
    Connecting,
    /// Handler connected; may or may not be the active connection.
    Connected,
    /// Handler torn down after having been connected.
    Disconnected,
}
