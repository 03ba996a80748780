//! Binary entry point: wire settings, the connection registry, the LLM
//! client and the orchestrator together, then serve HTTP.

use anyhow::Context;
use askdb::agent::Orchestrator;
use askdb::cli::Cli;
use askdb::config::Settings;
use askdb::connection::ConnectionManager;
use askdb::llm::{LlmClient, MockLlmClient, OpenAiClient, OpenAiConfig};
use askdb::server::{self, AppState};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();
    askdb::logging::init_stderr_logging();

    let settings = Arc::new(Settings::from_cli(&cli));

    let manager = Arc::new(
        ConnectionManager::with_store(settings.connections_path.clone())
            .context("failed to load the connection registry")?,
    );

    let llm: Arc<dyn LlmClient> = match &settings.llm_api_key {
        Some(api_key) => {
            let mut config = OpenAiConfig::new(api_key, &settings.llm_model);
            if let Some(base_url) = &settings.llm_base_url {
                config = config.with_base_url(base_url);
            }
            Arc::new(OpenAiClient::new(config).context("failed to build the LLM client")?)
        }
        None => {
            warn!("LLM_API_KEY not set; falling back to the mock LLM client");
            Arc::new(MockLlmClient::new())
        }
    };

    let orchestrator = Arc::new(
        Orchestrator::new(llm, manager.clone())
            .with_kosis_api_key(settings.kosis_api_key.clone()),
    );

    let app = server::router(AppState {
        manager,
        orchestrator,
        settings: settings.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, model = %settings.llm_model, "askdb listening");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;
    Ok(())
}
