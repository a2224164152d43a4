use super::state::{AppState, CaptureMode, ExpenseFeed};
use crate::extract::ExpenseCandidate;
use crate::model::{BucketKey, BudgetReport, LedgerEntry, MapMarker, Plan};
use crate::speech::{SessionHandle, SessionStatus};
use crate::sync::SyncOutcome;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartCaptureRequest {
    #[serde(default)]
    pub mode: CaptureMode,

    /// Plan whose ledger receives expenses in `expenses` mode
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    /// Free-text trip request; falls back to what the capture session heard
    pub input: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub key: BucketKey,
    pub plan: Plan,
    pub markers: Vec<MapMarker>,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub key: BucketKey,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Deserialize)]
pub struct AddExpenseRequest {
    /// Spoken or typed sentence for the extractor
    pub text: Option<String>,

    /// Manual `{amount, category, note}`, validated like extractor output
    #[serde(flatten)]
    pub record: Value,
}

#[derive(Debug, Serialize)]
pub struct CaptureStatusResponse {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub mode: CaptureMode,
    pub preview: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expenses: Option<ExpenseFeed>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn plan_response(plan: Plan) -> PlanResponse {
    PlanResponse {
        key: plan.bucket_key(),
        markers: plan.markers(),
        plan,
    }
}

fn find_plan(state: &AppState, key: &str) -> Result<Plan, Response> {
    match state.planner.open_plan(&BucketKey::new(key)) {
        Ok(Some(plan)) => Ok(plan),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Plan {} not found", key),
        )),
        Err(e) => {
            error!("Failed to load plan {}: {:#}", key, e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load plan: {}", e),
            ))
        }
    }
}

fn capture_handle(state: &AppState) -> Result<&SessionHandle, Response> {
    state.capture.as_ref().ok_or_else(|| {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "No speech engine configured".to_string(),
        )
    })
}

// ============================================================================
// Capture
// ============================================================================

/// POST /capture/start
/// Dictate plan intent, or with `{"mode": "expenses", "plan": key}` record
/// spoken expenses into that plan's ledger. No body means dictation.
pub async fn start_capture(
    State(state): State<AppState>,
    req: Option<Json<StartCaptureRequest>>,
) -> impl IntoResponse {
    let handle = match capture_handle(&state) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };
    let req = req.map(|Json(req)| req).unwrap_or_default();

    match req.mode {
        CaptureMode::Text => state.route_to_text().await,
        CaptureMode::Expenses => {
            let Some(key) = req.plan.as_deref() else {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Expense capture needs a plan".to_string(),
                );
            };
            let plan = match find_plan(&state, key) {
                Ok(plan) => plan,
                Err(resp) => return resp,
            };
            // The capture task ends when the route changes
            let _capture = state.route_to_expenses(plan).await;
        }
    }

    if let Err(e) = handle.start() {
        error!("Failed to start capture: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    info!("Capture start requested ({:?})", req.mode);
    (StatusCode::ACCEPTED, Json(handle.status())).into_response()
}

/// POST /capture/stop
pub async fn stop_capture(State(state): State<AppState>) -> impl IntoResponse {
    let handle = match capture_handle(&state) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };

    if let Err(e) = handle.stop() {
        error!("Failed to stop capture: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    state.end_expense_capture().await;

    info!("Capture stop requested");
    (StatusCode::ACCEPTED, Json(handle.status())).into_response()
}

/// GET /capture/status
/// Session state plus what has been heard so far and, once an expense
/// capture has run, what it extracted
pub async fn get_capture_status(State(state): State<AppState>) -> impl IntoResponse {
    let handle = match capture_handle(&state) {
        Ok(handle) => handle,
        Err(resp) => return resp,
    };

    let mode = state.mode().await;
    let expenses = state.expense_feed();
    let heard = state.heard.read().await;
    let preview = match (&mode, &expenses) {
        (CaptureMode::Expenses, Some(feed)) => feed.preview.clone(),
        _ => heard.preview().to_string(),
    };
    let response = CaptureStatusResponse {
        status: handle.status(),
        mode,
        preview,
        text: heard.text().to_string(),
        expenses,
    };
    (StatusCode::OK, Json(response)).into_response()
}

// ============================================================================
// Plans
// ============================================================================

/// POST /plans
/// Generate a plan from free text and save it
pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> impl IntoResponse {
    let input = match req.input {
        Some(input) if !input.trim().is_empty() => input,
        _ => state.heard.read().await.text().to_string(),
    };
    if input.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Trip request is empty".to_string());
    }

    let mut plan = match state.planner.generate_plan(&input).await {
        Ok(plan) => plan,
        Err(e) => {
            error!("Plan generation failed: {:#}", e);
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };

    match state.planner.save_plan(&mut plan).await {
        Ok(outcome) => {
            info!("Created plan {} ({:?})", plan.bucket_key(), outcome);
            (StatusCode::CREATED, Json(plan_response(plan))).into_response()
        }
        Err(e) => {
            error!("Failed to save plan: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /plans/:key
pub async fn get_plan(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    match find_plan(&state, &key) {
        Ok(plan) => (StatusCode::OK, Json(plan_response(plan))).into_response(),
        Err(resp) => resp,
    }
}

/// POST /plans/:key/sync
/// Retry the remote save of a plan; a draft that gets an id is re-keyed
pub async fn sync_plan(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    let mut plan = match find_plan(&state, &key) {
        Ok(plan) => plan,
        Err(resp) => return resp,
    };

    match state.planner.save_plan(&mut plan).await {
        Ok(outcome) => {
            let response = SaveResponse {
                key: plan.bucket_key(),
                outcome,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            error!("Failed to save plan {}: {:#}", key, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /trips
/// The signed-in user's remote plans
pub async fn list_trips(State(state): State<AppState>) -> impl IntoResponse {
    match state.planner.list_remote_plans().await {
        Ok(trips) => (StatusCode::OK, Json(trips)).into_response(),
        Err(e) => {
            error!("Failed to list remote trips: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

// ============================================================================
// Expenses
// ============================================================================

/// GET /plans/:key/expenses
pub async fn list_expenses(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let plan = match find_plan(&state, &key) {
        Ok(plan) => plan,
        Err(resp) => return resp,
    };

    match state.planner.load_expenses(&plan).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            error!("Failed to load expenses for {}: {:#}", key, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /plans/:key/expenses
/// Add an expense from a sentence or a manual record
pub async fn add_expense(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<AddExpenseRequest>,
) -> impl IntoResponse {
    let plan = match find_plan(&state, &key) {
        Ok(plan) => plan,
        Err(resp) => return resp,
    };

    let candidate = match req.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => match state.planner.parse_expense(text).await {
            Ok(candidate) => candidate,
            Err(e) => {
                error!("Expense extraction failed: {}", e);
                return error_response(StatusCode::BAD_GATEWAY, e.to_string());
            }
        },
        _ => ExpenseCandidate::from_untrusted(&req.record, ""),
    };

    match state.planner.add_expense(&plan, candidate) {
        Ok((entry, _mirror)) => (StatusCode::CREATED, Json::<LedgerEntry>(entry)).into_response(),
        Err(e) => {
            error!("Failed to add expense to {}: {:#}", key, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// DELETE /plans/:key/expenses/:id
pub async fn remove_expense(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
) -> impl IntoResponse {
    let plan = match find_plan(&state, &key) {
        Ok(plan) => plan,
        Err(resp) => return resp,
    };

    match state.planner.remove_expense(&plan, &id) {
        Ok((true, _delete)) => StatusCode::NO_CONTENT.into_response(),
        Ok((false, _)) => error_response(
            StatusCode::NOT_FOUND,
            format!("Expense {} not found in {}", id, key),
        ),
        Err(e) => {
            error!("Failed to remove expense {}: {:#}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /plans/:key/budget
pub async fn get_budget(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    let plan = match find_plan(&state, &key) {
        Ok(plan) => plan,
        Err(resp) => return resp,
    };

    match state.planner.budget_report(&plan) {
        Ok(report) => (StatusCode::OK, Json::<BudgetReport>(report)).into_response(),
        Err(e) => {
            error!("Failed to build budget report for {}: {:#}", key, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
