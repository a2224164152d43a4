use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Voice capture
        .route("/capture/start", post(handlers::start_capture))
        .route("/capture/stop", post(handlers::stop_capture))
        .route("/capture/status", get(handlers::get_capture_status))
        // Plans
        .route("/plans", post(handlers::create_plan))
        .route("/plans/:key", get(handlers::get_plan))
        .route("/plans/:key/sync", post(handlers::sync_plan))
        .route("/plans/:key/budget", get(handlers::get_budget))
        // Expense ledger
        .route(
            "/plans/:key/expenses",
            get(handlers::list_expenses).post(handlers::add_expense),
        )
        .route("/plans/:key/expenses/:id", delete(handlers::remove_expense))
        // Remote trips of the signed-in user
        .route("/trips", get(handlers::list_trips))
        // Browser front-ends call the API cross-origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
