//! Runtime settings.
//!
//! All environment inputs are read once at startup: LLM API key and model,
//! KOSIS API key, bind address, and the connections-file path. CLI flags
//! mirror the environment variables.

use crate::cli::Cli;
use crate::connection::store;
use std::path::PathBuf;

/// Default model used when none is configured.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default bind address.
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// API key for the OpenAI-compatible LLM endpoint.
    pub llm_api_key: Option<String>,
    /// Default model name.
    pub llm_model: String,
    /// Base URL override for compatible providers.
    pub llm_base_url: Option<String>,
    /// KOSIS OpenAPI key; enables the static fetch_kosis_data tool.
    pub kosis_api_key: Option<String>,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Path of the persisted connections file.
    pub connections_path: PathBuf,
}

impl Settings {
    /// Builds settings from parsed CLI arguments (which themselves fall back
    /// to environment variables).
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            llm_api_key: cli.llm_api_key.clone(),
            llm_model: cli
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_base_url: cli.llm_base_url.clone(),
            kosis_api_key: cli.kosis_api_key.clone(),
            bind_addr: cli
                .bind
                .clone()
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            connections_path: cli
                .connections
                .clone()
                .unwrap_or_else(store::default_path),
        }
    }
}
