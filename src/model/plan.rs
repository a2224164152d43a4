use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::BucketKey;

/// Kind of a plan item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Sight,
    Food,
    Hotel,
    Transport,
}

impl ItemKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sight" => Some(Self::Sight),
            "food" => Some(Self::Food),
            "hotel" => Some(Self::Hotel),
            "transport" => Some(Self::Transport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    /// "HH:MM"
    pub time: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub name: String,
    pub address: String,
    pub lng: f64,
    pub lat: f64,
    pub cost_estimate: f64,
    pub tips: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub day: u32,
    pub title: String,
    /// Expected in time order; not re-sorted, see [`Plan::unsorted_days`]
    pub items: Vec<PlanItem>,
}

/// Planned spend per category. `total` is advisory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetBreakdown {
    pub transport: f64,
    pub hotel: f64,
    pub food: f64,
    pub tickets: f64,
    pub others: f64,
    pub total: f64,
}

/// A multi-day trip plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Remote identity; `None` while the plan is a local draft
    pub id: Option<String>,
    /// Bucket key minted when the plan was created
    pub draft_key: BucketKey,
    pub title: String,
    pub summary: String,
    pub input_text: String,
    pub days: Vec<DayPlan>,
    pub budget: BudgetBreakdown,
}

/// A point to drop on the map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    pub name: String,
    pub lng: f64,
    pub lat: f64,
}

impl Plan {
    /// Start an empty draft
    pub fn draft(title: impl Into<String>, input_text: impl Into<String>) -> Self {
        Self {
            id: None,
            draft_key: BucketKey::draft(Utc::now()),
            title: title.into(),
            summary: String::new(),
            input_text: input_text.into(),
            days: Vec::new(),
            budget: BudgetBreakdown::default(),
        }
    }

    pub fn is_draft(&self) -> bool {
        self.id.is_none()
    }

    /// Key under which this plan's ledger is filed
    pub fn bucket_key(&self) -> BucketKey {
        match &self.id {
            Some(id) => BucketKey::new(id.clone()),
            None => self.draft_key.clone(),
        }
    }

    /// Every item flattened in day/item order
    pub fn markers(&self) -> Vec<MapMarker> {
        self.days
            .iter()
            .flat_map(|d| d.items.iter())
            .filter(|it| it.lng.is_finite() && it.lat.is_finite())
            .map(|it| MapMarker {
                name: it.name.clone(),
                lng: it.lng,
                lat: it.lat,
            })
            .collect()
    }

    /// Day numbers whose items are not in time order
    ///
    /// Items are kept in the order the generator produced them. Times that
    /// do not parse as `HH:MM` are skipped.
    pub fn unsorted_days(&self) -> Vec<u32> {
        self.days
            .iter()
            .filter(|d| {
                let times: Vec<NaiveTime> = d
                    .items
                    .iter()
                    .filter_map(|it| NaiveTime::parse_from_str(it.time.trim(), "%H:%M").ok())
                    .collect();
                times.windows(2).any(|w| w[0] > w[1])
            })
            .map(|d| d.day)
            .collect()
    }
}
