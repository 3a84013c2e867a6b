use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::static_files::static_handler;
use super::state::AppState;

// UI Routes - web interface
pub fn ui_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::ui::index_handler))
        .route("/static/{*path}", get(static_handler))
}

// API Routes - JSON endpoints used by the UI
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Question and query endpoints
            .route("/ask", post(handlers::api::ask))
            .route("/query", post(handlers::api::run_query))
            .route("/download", get(handlers::api::download_sql))
            // Session history
            .route(
                "/history",
                get(handlers::api::get_history).delete(handlers::api::clear_history),
            )
            // Dataset description
            .route("/schema", get(handlers::api::get_schema))
            .route("/examples", get(handlers::api::list_examples))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(ui_routes())
        .merge(api_routes())
        .with_state(state)
}
