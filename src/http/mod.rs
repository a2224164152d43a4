//! HTTP API for the trip planner
//!
//! - POST /capture/start, POST /capture/stop, GET /capture/status - voice capture
//!   (dictation, or `{"mode": "expenses", "plan": key}` for spoken expenses)
//! - POST /plans - Generate and save a plan from free text
//! - GET /plans/:key - Plan with map markers
//! - POST /plans/:key/sync - Retry the remote save of a draft
//! - GET|POST /plans/:key/expenses, DELETE /plans/:key/expenses/:id - ledger
//! - GET /plans/:key/budget - Planned vs. actual spend
//! - GET /trips - Remote plans of the signed-in user
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
