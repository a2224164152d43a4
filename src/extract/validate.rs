use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Error;
use crate::model::{
    BucketKey, BudgetBreakdown, Category, DayPlan, ItemKind, LedgerEntry, Plan, PlanItem,
};

/// Longest note kept on a ledger entry, in characters
pub const NOTE_MAX_CHARS: usize = 80;

/// Note used when neither the record nor the input carries any text
pub const EMPTY_NOTE: &str = "(no note)";

const PLAN_TITLE_MAX_CHARS: usize = 30;
const DEFAULT_PLAN_TITLE: &str = "AI trip";

/// A validated expense, ready to become a [`LedgerEntry`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseCandidate {
    pub amount: f64,
    pub category: Category,
    pub note: String,
}

impl ExpenseCandidate {
    /// Validate an untrusted `{amount, category, note}` record
    ///
    /// Never fails: every field is coerced or defaulted.
    pub fn from_untrusted(value: &Value, original_text: &str) -> Self {
        let amount = coerce_number(value.get("amount"));
        let category = value
            .get("category")
            .and_then(Value::as_str)
            .and_then(Category::parse)
            .unwrap_or(Category::Others);
        let note = value.get("note").map(coerce_text).unwrap_or_default();

        Self {
            amount,
            category,
            note,
        }
        .normalized(original_text)
    }

    /// Apply the defaulting rules. Idempotent.
    pub fn normalized(mut self, original_text: &str) -> Self {
        if !(self.amount.is_finite() && self.amount > 0.0) {
            self.amount = 0.0;
        }

        let note = match self.note.trim() {
            "" => original_text.trim(),
            note => note,
        };
        let note = if note.is_empty() { EMPTY_NOTE } else { note };
        self.note = truncate_chars(note, NOTE_MAX_CHARS).trim_end().to_string();

        self
    }

    /// Stamp a fresh id and the current time
    pub fn into_entry(self) -> LedgerEntry {
        LedgerEntry::new(self.amount, self.category, self.note)
    }
}

/// Validate an untrusted plan record produced from `input_text`
///
/// Numeric fields are coerced, but coordinates must be JSON numbers: a plan
/// with a non-numeric `lng`/`lat` is rejected as a whole.
pub fn plan_from_untrusted(value: &Value, input_text: &str) -> Result<Plan, Error> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::ExtractionFailed("plan is not a JSON object".to_string()))?;

    let summary = text_field(obj, "summary");
    let title = match truncate_chars(summary.trim(), PLAN_TITLE_MAX_CHARS) {
        "" => match text_field(obj, "title").trim() {
            "" => DEFAULT_PLAN_TITLE.to_string(),
            t => t.to_string(),
        },
        t => t.to_string(),
    };

    let days = match obj.get("days") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(days)) => days
            .iter()
            .enumerate()
            .map(|(i, d)| day_from_untrusted(d, i))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(Error::ExtractionFailed("plan days is not an array".to_string()));
        }
    };

    let budget = obj
        .get("budget")
        .and_then(Value::as_object)
        .map(|b| BudgetBreakdown {
            transport: coerce_number(b.get("transport")),
            hotel: coerce_number(b.get("hotel")),
            food: coerce_number(b.get("food")),
            tickets: coerce_number(b.get("tickets")),
            others: coerce_number(b.get("others")),
            total: coerce_number(b.get("total")),
        })
        .unwrap_or_default();

    let plan = Plan {
        id: None,
        draft_key: BucketKey::draft(Utc::now()),
        title,
        summary,
        input_text: input_text.to_string(),
        days,
        budget,
    };

    let unsorted = plan.unsorted_days();
    if !unsorted.is_empty() {
        warn!("Plan items out of time order on days {:?}; keeping generator order", unsorted);
    }

    Ok(plan)
}

fn day_from_untrusted(value: &Value, index: usize) -> Result<DayPlan, Error> {
    let fallback_day = index as u32 + 1;
    let obj = value.as_object().ok_or_else(|| {
        Error::ExtractionFailed(format!("day {} is not a JSON object", fallback_day))
    })?;

    let day = obj
        .get("day")
        .and_then(Value::as_u64)
        .filter(|d| *d >= 1)
        .map(|d| d as u32)
        .unwrap_or(fallback_day);

    let items = match obj.get("items") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, it)| item_from_untrusted(it, day, i + 1))
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    Ok(DayPlan {
        day,
        title: text_field(obj, "title"),
        items,
    })
}

fn item_from_untrusted(value: &Value, day: u32, position: usize) -> Result<PlanItem, Error> {
    let obj = value.as_object().ok_or_else(|| {
        Error::ExtractionFailed(format!("day {} item {} is not a JSON object", day, position))
    })?;

    let coordinate = |key: &str| -> Result<f64, Error> {
        obj.get(key)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                Error::ExtractionFailed(format!(
                    "day {} item {}: {} is not a number",
                    day, position, key
                ))
            })
    };

    let cost = obj.get("cost_estimate").or_else(|| obj.get("costEstimate"));

    Ok(PlanItem {
        time: text_field(obj, "time"),
        kind: obj
            .get("type")
            .and_then(Value::as_str)
            .and_then(ItemKind::parse)
            .unwrap_or(ItemKind::Sight),
        name: text_field(obj, "name"),
        address: text_field(obj, "address"),
        lng: coordinate("lng")?,
        lat: coordinate("lat")?,
        cost_estimate: non_negative(coerce_number(cost)),
        tips: text_field(obj, "tips"),
    })
}

/// Slice the outermost `{...}` out of a model reply
///
/// Models occasionally wrap JSON in prose or code fences.
pub fn extract_json_object(s: &str) -> &str {
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if end > start => &s[start..=end],
        _ => s,
    }
}

/// Numbers pass through, numeric strings are parsed, anything else is 0
fn coerce_number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) if s.trim().is_empty() => 0.0,
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn non_negative(n: f64) -> f64 {
    if n > 0.0 {
        n
    } else {
        0.0
    }
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).map(coerce_text).unwrap_or_default()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
