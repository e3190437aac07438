use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{auth_middleware, AuthService};

use super::handlers::{
    ask_report, create_dashboard, create_report, delete_dashboard, delete_report, get_dashboard,
    get_options, get_report, health_check, list_dashboards, list_reports, run_report,
    update_dashboard, update_report, AppState,
};

pub fn create_api_router(state: Arc<AppState>, auth_service: Arc<AuthService>) -> Router {
    let protected_routes = Router::new()
        .route("/reports/run", post(run_report))
        .route("/reports/ask", post(ask_report))
        .route("/options", get(get_options))
        .route("/reports", post(create_report).get(list_reports))
        .route(
            "/reports/{id}",
            get(get_report).put(update_report).delete(delete_report),
        )
        .route("/dashboards", post(create_dashboard).get(list_dashboards))
        .route(
            "/dashboards/{id}",
            get(get_dashboard)
                .put(update_dashboard)
                .delete(delete_dashboard),
        )
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", protected_routes)
        .layer(CorsLayer::permissive())
}
