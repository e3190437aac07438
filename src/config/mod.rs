use anyhow::Context;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub bigquery: BigQueryConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub assistant: Option<AssistantConfig>,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    pub project_id: String,
    /// Service-account key JSON (inline).
    pub credentials_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Append the channel/event/signal/URL filters to the engagement
    /// session WHERE clause. Off by default: the filters are computed but
    /// historically unused, and flipping this changes every engagement
    /// metric's population.
    pub apply_session_filters: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("FUNNELBOARD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("FUNNELBOARD_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let project_id = std::env::var("FUNNELBOARD_BQ_PROJECT")
            .context("FUNNELBOARD_BQ_PROJECT must be set")?;

        // Credentials come inline, from a file, or base64-encoded (the
        // usual container-secret shape).
        let credentials_json = if let Ok(inline) = std::env::var("FUNNELBOARD_BQ_CREDENTIALS") {
            inline
        } else if let Ok(encoded) = std::env::var("FUNNELBOARD_BQ_CREDENTIALS_B64") {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context("FUNNELBOARD_BQ_CREDENTIALS_B64 is not valid base64")?;
            String::from_utf8(bytes).context("decoded credentials are not valid UTF-8")?
        } else if let Ok(path) = std::env::var("FUNNELBOARD_BQ_CREDENTIALS_FILE") {
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read credentials file {path}"))?
        } else {
            anyhow::bail!(
                "one of FUNNELBOARD_BQ_CREDENTIALS, FUNNELBOARD_BQ_CREDENTIALS_B64 or \
                 FUNNELBOARD_BQ_CREDENTIALS_FILE must be set"
            );
        };

        let database_url = std::env::var("FUNNELBOARD_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./funnelboard.db".to_string());

        let api_keys = std::env::var("FUNNELBOARD_API_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let assistant = match std::env::var("FUNNELBOARD_ASSISTANT_ENDPOINT") {
            Ok(endpoint) => {
                let api_key = std::env::var("FUNNELBOARD_ASSISTANT_API_KEY").context(
                    "FUNNELBOARD_ASSISTANT_API_KEY must be set when an assistant endpoint is configured",
                )?;
                let model = std::env::var("FUNNELBOARD_ASSISTANT_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string());
                Some(AssistantConfig {
                    endpoint,
                    api_key,
                    model,
                })
            }
            Err(_) => None,
        };

        let apply_session_filters = std::env::var("FUNNELBOARD_APPLY_SESSION_FILTERS")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Ok(Config {
            server: ServerConfig { host, port },
            bigquery: BigQueryConfig {
                project_id,
                credentials_json,
            },
            store: StoreConfig { database_url },
            auth: AuthConfig { api_keys },
            assistant,
            query: QueryConfig {
                apply_session_filters,
            },
        })
    }
}
