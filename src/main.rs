use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use funnelboard::api::{create_api_router, AppState};
use funnelboard::assist::{Assistant, HttpAssistant};
use funnelboard::auth::AuthService;
use funnelboard::config::Config;
use funnelboard::engine::{BigQueryEngine, QueryEngine};
use funnelboard::options::OptionsService;
use funnelboard::report::ReportOrchestrator;
use funnelboard::store::{ReportStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize the warehouse engine
    let engine: Arc<dyn QueryEngine> = Arc::new(BigQueryEngine::new(
        &config.bigquery.project_id,
        &config.bigquery.credentials_json,
    )?);
    info!(
        "Using BigQuery project: {}",
        config.bigquery.project_id
    );

    // Initialize the saved-report store
    info!("Using SQLite store: {}", config.store.database_url);
    let store: Arc<dyn ReportStore> = Arc::new(SqliteStore::new(&config.store.database_url).await?);
    store.init().await?;
    info!("Store initialized successfully");

    // Initialize auth
    let auth_service = Arc::new(AuthService::new(config.auth.api_keys.clone()));
    if config.auth.api_keys.is_empty() {
        info!("🔓 Authentication is disabled - all API requests are allowed");
    } else {
        info!(
            "🔐 API key authentication enabled ({} key(s) configured)",
            config.auth.api_keys.len()
        );
    }

    // Optional natural-language assistant
    let assistant: Option<Arc<dyn Assistant>> = match config.assistant.as_ref() {
        Some(assistant_config) => {
            info!(
                "💬 Assistant enabled (model: {})",
                assistant_config.model
            );
            Some(Arc::new(HttpAssistant::new(assistant_config)?))
        }
        None => {
            info!("Assistant is not configured - /api/reports/ask is disabled");
            None
        }
    };

    if config.query.apply_session_filters {
        info!("Engagement session filters are applied to queries");
    }

    let state = Arc::new(AppState {
        orchestrator: ReportOrchestrator::new(
            Arc::clone(&engine),
            config.bigquery.project_id.clone(),
            config.query.apply_session_filters,
        ),
        options: OptionsService::new(Arc::clone(&engine), config.bigquery.project_id.clone()),
        store,
        assistant,
    });

    let router = create_api_router(state, auth_service);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Server listening on http://{}", addr);
    info!("   - API endpoints available at http://{}/api/...", addr);

    axum::serve(listener, router).await?;

    Ok(())
}
