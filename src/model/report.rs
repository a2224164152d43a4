use serde::Serialize;

use super::ledger::{Category, LedgerEntry};
use super::plan::BudgetBreakdown;

/// Actual vs. planned spend for one line of the budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetLine {
    pub label: &'static str,
    pub actual: f64,
    pub planned: f64,
}

/// Budget vs. actual for a plan's ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReport {
    pub lines: Vec<BudgetLine>,
    pub actual_total: f64,
    pub planned_total: f64,
}

impl BudgetReport {
    /// The budget has no shopping line, so shopping counts against "others".
    pub fn build(budget: &BudgetBreakdown, entries: &[LedgerEntry]) -> Self {
        let actual = |cats: &[Category]| -> f64 {
            entries
                .iter()
                .filter(|e| cats.contains(&e.category))
                .map(|e| e.amount)
                .sum()
        };

        let lines = vec![
            BudgetLine {
                label: "transport",
                actual: actual(&[Category::Transport]),
                planned: budget.transport,
            },
            BudgetLine {
                label: "hotel",
                actual: actual(&[Category::Hotel]),
                planned: budget.hotel,
            },
            BudgetLine {
                label: "food",
                actual: actual(&[Category::Food]),
                planned: budget.food,
            },
            BudgetLine {
                label: "tickets",
                actual: actual(&[Category::Tickets]),
                planned: budget.tickets,
            },
            BudgetLine {
                label: "others",
                actual: actual(&[Category::Others, Category::Shopping]),
                planned: budget.others,
            },
        ];

        Self {
            lines,
            actual_total: entries.iter().map(|e| e.amount).sum(),
            planned_total: budget.total,
        }
    }

    pub fn line(&self, label: &str) -> Option<&BudgetLine> {
        self.lines.iter().find(|l| l.label == label)
    }
}
