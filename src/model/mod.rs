//! Records captured by the planner: trip plans and their expense ledgers

mod ledger;
mod plan;
mod report;

pub use ledger::{sort_newest_first, BucketKey, Category, LedgerEntry};
pub use plan::{BudgetBreakdown, DayPlan, ItemKind, MapMarker, Plan, PlanItem};
pub use report::{BudgetLine, BudgetReport};
