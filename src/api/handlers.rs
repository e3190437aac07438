use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::assist::Assistant;
use crate::models::{Dashboard, ReportConfig, SavedReport};
use crate::options::OptionsService;
use crate::report::{ReportOrchestrator, ReportResult};
use crate::store::{ReportStore, StoreError};

/// Linear retry budget for the ask endpoint: each failed execution feeds
/// its error back into the next translation attempt.
const MAX_ASK_ATTEMPTS: usize = 3;

pub struct AppState {
    pub orchestrator: ReportOrchestrator,
    pub options: OptionsService,
    pub store: Arc<dyn ReportStore>,
    pub assistant: Option<Arc<dyn Assistant>>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(message: String) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("{what} not found"),
        }),
    )
}

pub async fn health_check() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run a report configuration: build both queries, execute, return
/// combined results.
pub async fn run_report(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ReportConfig>,
) -> Result<Json<ReportResult>, ApiError> {
    match state.orchestrator.run(&config).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            tracing::error!("Report execution failed: {}", e);
            Err(internal_error(format!("Report execution failed: {e}")))
        }
    }
}

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub config: ReportConfig,
    pub result: ReportResult,
    pub attempts: usize,
}

/// Answer a natural-language question: translate it to a report config,
/// run it, and retry the translation with the execution error on failure.
pub async fn ask_report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let Some(assistant) = state.assistant.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Assistant is not configured".to_string(),
            }),
        ));
    };

    let catalog = state.options.catalog().await.map_err(|e| {
        tracing::error!("Failed to load options catalog: {}", e);
        internal_error(format!("Failed to load options catalog: {e}"))
    })?;

    let mut last_error: Option<String> = None;
    for attempt in 1..=MAX_ASK_ATTEMPTS {
        let config = assistant
            .translate(&request.question, &catalog, last_error.as_deref())
            .await
            .map_err(|e| {
                tracing::error!("Assistant translation failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(ErrorResponse {
                        error: format!("Assistant translation failed: {e}"),
                    }),
                )
            })?;

        match state.orchestrator.run(&config).await {
            Ok(result) => {
                return Ok(Json(AskResponse {
                    config,
                    result,
                    attempts: attempt,
                }));
            }
            Err(e) => {
                tracing::warn!("Ask attempt {}/{} failed: {}", attempt, MAX_ASK_ATTEMPTS, e);
                last_error = Some(e.to_string());
            }
        }
    }

    Err(internal_error(format!(
        "Report execution failed after {MAX_ASK_ATTEMPTS} attempts: {}",
        last_error.unwrap_or_default()
    )))
}

pub async fn get_options(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::options::OptionsCatalog>, ApiError> {
    match state.options.catalog().await {
        Ok(catalog) => Ok(Json(catalog)),
        Err(e) => {
            tracing::error!("Failed to load options catalog: {}", e);
            Err(internal_error(format!("Failed to load options: {e}")))
        }
    }
}

#[derive(Deserialize)]
pub struct SaveReportRequest {
    pub name: String,
    pub config: Value,
}

pub async fn create_report(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SaveReportRequest>,
) -> Result<(StatusCode, Json<SavedReport>), ApiError> {
    if payload.name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Report name cannot be empty".to_string(),
            }),
        ));
    }

    let config = payload.config.to_string();
    match state.store.create_report(&payload.name, &config).await {
        Ok(report) => Ok((StatusCode::CREATED, Json(report))),
        Err(e) => Err(internal_error(format!("Failed to save report: {e}"))),
    }
}

pub async fn list_reports(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SavedReport>>, ApiError> {
    state
        .store
        .list_reports()
        .await
        .map(Json)
        .map_err(|e| internal_error(format!("Failed to list reports: {e}")))
}

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SavedReport>, ApiError> {
    match state.store.get_report(&id).await {
        Ok(Some(report)) => Ok(Json(report)),
        Ok(None) => Err(not_found("Report")),
        Err(e) => Err(internal_error(format!("Failed to get report: {e}"))),
    }
}

pub async fn update_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<SaveReportRequest>,
) -> Result<Json<SavedReport>, ApiError> {
    let config = payload.config.to_string();
    match state.store.update_report(&id, &payload.name, &config).await {
        Ok(report) => Ok(Json(report)),
        Err(StoreError::NotFound) => Err(not_found("Report")),
        Err(e) => Err(internal_error(format!("Failed to update report: {e}"))),
    }
}

pub async fn delete_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    match state.store.delete_report(&id).await {
        Ok(true) => Ok(Json(SuccessResponse {
            message: "Report deleted".to_string(),
        })),
        Ok(false) => Err(not_found("Report")),
        Err(e) => Err(internal_error(format!("Failed to delete report: {e}"))),
    }
}

#[derive(Deserialize)]
pub struct SaveDashboardRequest {
    pub name: String,
    pub layout: Value,
}

pub async fn create_dashboard(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SaveDashboardRequest>,
) -> Result<(StatusCode, Json<Dashboard>), ApiError> {
    if payload.name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Dashboard name cannot be empty".to_string(),
            }),
        ));
    }

    let layout = payload.layout.to_string();
    match state.store.create_dashboard(&payload.name, &layout).await {
        Ok(dashboard) => Ok((StatusCode::CREATED, Json(dashboard))),
        Err(e) => Err(internal_error(format!("Failed to save dashboard: {e}"))),
    }
}

pub async fn list_dashboards(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Dashboard>>, ApiError> {
    state
        .store
        .list_dashboards()
        .await
        .map(Json)
        .map_err(|e| internal_error(format!("Failed to list dashboards: {e}")))
}

pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Dashboard>, ApiError> {
    match state.store.get_dashboard(&id).await {
        Ok(Some(dashboard)) => Ok(Json(dashboard)),
        Ok(None) => Err(not_found("Dashboard")),
        Err(e) => Err(internal_error(format!("Failed to get dashboard: {e}"))),
    }
}

pub async fn update_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<SaveDashboardRequest>,
) -> Result<Json<Dashboard>, ApiError> {
    let layout = payload.layout.to_string();
    match state
        .store
        .update_dashboard(&id, &payload.name, &layout)
        .await
    {
        Ok(dashboard) => Ok(Json(dashboard)),
        Err(StoreError::NotFound) => Err(not_found("Dashboard")),
        Err(e) => Err(internal_error(format!("Failed to update dashboard: {e}"))),
    }
}

pub async fn delete_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    match state.store.delete_dashboard(&id).await {
        Ok(true) => Ok(Json(SuccessResponse {
            message: "Dashboard deleted".to_string(),
        })),
        Ok(false) => Err(not_found("Dashboard")),
        Err(e) => Err(internal_error(format!("Failed to delete dashboard: {e}"))),
    }
}
