//! Command-line argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// An agentic natural-language query server over heterogeneous data sources.
#[derive(Parser, Debug)]
#[command(name = "askdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// API key for the OpenAI-compatible LLM endpoint
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Model name used for planning and SQL generation
    #[arg(long, env = "LLM_MODEL")]
    pub model: Option<String>,

    /// Base URL of the LLM API (for compatible providers)
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// KOSIS OpenAPI key; enables the fetch_kosis_data tool
    #[arg(long, env = "KOSIS_API_KEY", hide_env_values = true)]
    pub kosis_api_key: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long, env = "BIND_ADDR", value_name = "ADDR")]
    pub bind: Option<String>,

    /// Path of the persisted connections file
    #[arg(long, env = "CONNECTIONS_PATH", value_name = "PATH")]
    pub connections: Option<PathBuf>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_args() {
        let cli = Cli::parse_from(["askdb"]);
        assert!(cli.model.is_none());
        assert!(cli.bind.is_none());
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "askdb",
            "--model",
            "gpt-4o",
            "--bind",
            "0.0.0.0:9000",
        ]);
        assert_eq!(cli.model.as_deref(), Some("gpt-4o"));
        assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:9000"));
    }
}
