//! Text-to-record extraction
//!
//! The extractor is an external LLM endpoint and its output is untrusted:
//! it returns raw JSON, and `validate` coerces and defaults every field
//! before anything reaches the store.

mod http;
mod validate;

use serde_json::Value;

use crate::error::Error;

pub use http::{parse_record_body, HttpExtractor};
pub use validate::{
    extract_json_object, plan_from_untrusted, ExpenseCandidate, EMPTY_NOTE, NOTE_MAX_CHARS,
};

/// Turns free text into a candidate record
///
/// Every failure (unreachable endpoint, non-2xx, malformed or missing
/// content) is reported as [`Error::ExtractionFailed`].
#[async_trait::async_trait]
pub trait RecordExtractor: Send + Sync {
    /// Candidate `{amount, category, note}` for a spoken expense
    async fn extract_expense(&self, text: &str) -> Result<Value, Error>;

    /// Candidate plan JSON for a trip request
    async fn extract_plan(&self, input: &str) -> Result<Value, Error>;
}
