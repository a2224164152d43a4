use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expense category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Transport,
    Hotel,
    Food,
    Tickets,
    Shopping,
    Others,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Transport,
        Category::Hotel,
        Category::Food,
        Category::Tickets,
        Category::Shopping,
        Category::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Transport => "transport",
            Category::Hotel => "hotel",
            Category::Food => "food",
            Category::Tickets => "tickets",
            Category::Shopping => "shopping",
            Category::Others => "others",
        }
    }

    /// Parse a category name, trimmed and case-insensitive
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single expense filed under one plan's bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Locally generated, never changes after creation
    pub id: String,
    pub amount: f64,
    pub category: Category,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create an entry with a fresh id, stamped now
    pub fn new(amount: f64, category: Category, note: impl Into<String>) -> Self {
        Self::with_timestamp(amount, category, note, Utc::now())
    }

    pub fn with_timestamp(
        amount: f64,
        category: Category,
        note: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            amount,
            category,
            note: note.into(),
            created_at,
        }
    }
}

/// Partition key scoping a ledger collection to one plan
///
/// `draft_<millis>` while the plan is unsaved, the plan's remote id after.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketKey(String);

const DRAFT_PREFIX: &str = "draft_";

impl BucketKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Mint a draft key for a plan created at `at`
    ///
    /// The random suffix keeps plans created in the same millisecond apart.
    pub fn draft(at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}{}_{}", DRAFT_PREFIX, at.timestamp_millis(), &suffix[..8]))
    }

    pub fn is_draft(&self) -> bool {
        self.0.starts_with(DRAFT_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Sort newest first by `created_at`
///
/// The sort is stable, so callers that put the latest insertion at the front
/// get "most recently inserted first" among equal timestamps.
pub fn sort_newest_first(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
