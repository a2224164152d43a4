use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::Error;
use crate::extract::ExpenseCandidate;
use crate::model::{LedgerEntry, Plan};

pub const TRIPS_TABLE: &str = "trips";
pub const EXPENSES_TABLE: &str = "expenses";

/// Signed-in user on whose behalf remote writes are made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
}

/// Resolves the current user, if any
///
/// `None` means remote sync is disabled for the operation at hand; it is
/// not an error.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self) -> Option<Identity>;
}

/// Identity fixed at startup (from configuration)
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<Identity>);

impl StaticIdentity {
    pub fn signed_in(identity: Identity) -> Self {
        Self(Some(identity))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    async fn resolve(&self) -> Option<Identity> {
        self.0.clone()
    }
}

/// Why a remote call failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RemoteError {
    #[error("no signed-in identity")]
    NoIdentity,

    #[error("remote request failed: {0}")]
    Transport(String),

    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Whether the remote complained about `column` (schema mismatch)
    pub fn mentions_column(&self, column: &str) -> bool {
        matches!(self, Self::Rejected { message, .. } if message.contains(column))
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Error::RemoteUnavailable(e.to_string())
    }
}

/// Equality filter on a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Opaque row-oriented remote store
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a row and return its remote id
    async fn insert(&self, identity: &Identity, table: &str, row: Value)
        -> Result<String, RemoteError>;

    async fn select(
        &self,
        identity: &Identity,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Value>, RemoteError>;

    async fn delete(
        &self,
        identity: &Identity,
        table: &str,
        filters: &[Filter],
    ) -> Result<(), RemoteError>;
}

/// A remote store together with the identity it writes as
#[derive(Clone)]
pub struct RemoteLink {
    store: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl RemoteLink {
    pub fn new(store: Arc<dyn RemoteStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.resolve().await
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }
}

/// Remote trip list row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlanSummary {
    pub id: String,
    pub title: String,
    pub input_text: String,
    pub created_at: Option<DateTime<Utc>>,
}

pub fn trip_row(plan: &Plan, user_id: Option<&str>) -> Result<Value, RemoteError> {
    let body = serde_json::to_value(plan).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    let mut row = json!({
        "title": plan.title,
        "input_text": plan.input_text,
        "plan": body,
    });
    if let Some(user_id) = user_id {
        row["user_id"] = Value::String(user_id.to_string());
    }
    Ok(row)
}

pub fn expense_row(entry: &LedgerEntry, remote_plan_id: &str, user_id: &str) -> Value {
    json!({
        "trip_id": remote_plan_id,
        "client_id": entry.id,
        "amount": entry.amount,
        "category": entry.category,
        "note": entry.note,
        "created_at": entry.created_at.to_rfc3339(),
        "user_id": user_id,
    })
}

/// Remote ids may come back as numbers or strings
pub fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn row_timestamp(row: &Value) -> Option<DateTime<Utc>> {
    row.get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Rebuild a ledger entry from a remote row
///
/// Rows are validated like extractor output. The local id travels as
/// `client_id` so it survives the round trip.
pub fn entry_from_row(row: &Value) -> Option<LedgerEntry> {
    let id = row
        .get("client_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| row_id(row))?;
    let candidate = ExpenseCandidate::from_untrusted(row, "");

    Some(LedgerEntry {
        id,
        amount: candidate.amount,
        category: candidate.category,
        note: candidate.note,
        created_at: row_timestamp(row).unwrap_or_else(Utc::now),
    })
}

pub fn plan_summary_from_row(row: &Value) -> Option<RemotePlanSummary> {
    let text = |key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Some(RemotePlanSummary {
        id: row_id(row)?,
        title: text("title"),
        input_text: text("input_text"),
        created_at: row_timestamp(row),
    })
}
