// Integration tests for capture routing: free-text accumulation and
// serialized expense extraction into the ledger.

mod common;

use anyhow::Result;
use common::FakeExtractor;
use futures::stream;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trip_planner::capture::{CaptureUpdate, ExpenseCapture, FreeTextCapture};
use trip_planner::model::{Category, Plan};
use trip_planner::speech::RecognitionEvent;
use trip_planner::store::{LocalFirstStore, MemoryStore};
use trip_planner::Planner;

fn planner(extractor: FakeExtractor) -> Planner {
    Planner::new(LocalFirstStore::local_only(MemoryStore::new()), Arc::new(extractor))
}

#[tokio::test]
async fn test_spoken_lunch_lands_in_ledger() -> Result<()> {
    let extractor = FakeExtractor::new().expense(
        "午饭 80 元",
        json!({ "amount": 80, "category": "food", "note": "午饭" }),
    );
    let planner = planner(extractor);
    let plan = Plan::draft("京都五日", "我想去京都五天");

    let events = stream::iter(vec![
        RecognitionEvent::interim("午饭"),
        RecognitionEvent::final_("午饭 80 元"),
    ]);
    let mut previews = Vec::new();
    let added = planner
        .capture_expenses(&plan, events, |update| {
            if let CaptureUpdate::Preview(text) = update {
                previews.push(text.clone());
            }
        })
        .await?;

    assert_eq!(previews, vec!["午饭".to_string(), String::new()]);
    assert_eq!(added.len(), 1);

    let ledger = planner.store().read_ledger_entries(&plan.bucket_key())?;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, 80.0);
    assert_eq!(ledger[0].category, Category::Food);
    assert_eq!(ledger[0].note, "午饭");
    assert!(!ledger[0].id.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_garbage_record_is_defaulted() -> Result<()> {
    let extractor = FakeExtractor::new().expense(
        "买了点东西",
        json!({ "amount": "abc", "category": "unknown_cat" }),
    );
    let planner = planner(extractor);
    let plan = Plan::draft("trip", "");

    let events = stream::iter(vec![RecognitionEvent::final_("买了点东西")]);
    planner.capture_expenses(&plan, events, |_| {}).await?;

    let ledger = planner.store().read_ledger_entries(&plan.bucket_key())?;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, 0.0);
    assert_eq!(ledger[0].category, Category::Others);
    assert_eq!(ledger[0].note, "买了点东西");
    Ok(())
}

#[tokio::test]
async fn test_failed_extraction_adds_nothing() -> Result<()> {
    let planner = planner(FakeExtractor::new());
    let plan = Plan::draft("trip", "");

    let events = stream::iter(vec![RecognitionEvent::final_("听不懂")]);
    let mut failures = 0;
    let added = planner
        .capture_expenses(&plan, events, |update| {
            if matches!(update, CaptureUpdate::Failed { .. }) {
                failures += 1;
            }
        })
        .await?;

    assert_eq!(failures, 1);
    assert!(added.is_empty());
    assert!(planner.store().read_ledger_entries(&plan.bucket_key())?.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_last_final_wins_while_busy() -> Result<()> {
    let extractor = FakeExtractor::new()
        .expense("taxi 30", json!({ "amount": 30, "category": "transport" }))
        .expense("coffee 5", json!({ "amount": 5, "category": "food" }))
        .expense("museum 20", json!({ "amount": 20, "category": "tickets" }))
        .with_delay(Duration::from_millis(100));

    let events = stream::iter(vec![
        RecognitionEvent::final_("taxi 30"),
        RecognitionEvent::final_("coffee 5"),
        RecognitionEvent::final_("museum 20"),
    ]);

    let mut extracted = Vec::new();
    let mut capture = ExpenseCapture::new();
    capture
        .run(events, &extractor, |update| {
            if let CaptureUpdate::Extracted { utterance, candidate } = update {
                extracted.push((utterance, candidate.amount));
            }
        })
        .await;

    // "coffee 5" was queued, then replaced before it could run
    assert_eq!(extractor.calls(), vec!["taxi 30", "museum 20"]);
    assert_eq!(
        extracted,
        vec![("taxi 30".to_string(), 30.0), ("museum 20".to_string(), 20.0)]
    );
    assert!(!capture.is_busy());
    Ok(())
}

#[tokio::test]
async fn test_dictated_plan_input_is_joined() -> Result<()> {
    let events = stream::iter(vec![
        RecognitionEvent::interim("I want"),
        RecognitionEvent::final_("I want to visit"),
        RecognitionEvent::final_("Kyoto"),
        RecognitionEvent::final_("预算一万"),
        RecognitionEvent::final_("元"),
    ]);
    let mut capture = FreeTextCapture::new();
    capture.run(events, |_| {}).await;

    assert_eq!(capture.into_text(), "I want to visit Kyoto预算一万元");
    Ok(())
}

#[tokio::test]
async fn test_free_text_reports_every_event() -> Result<()> {
    let events = stream::iter(vec![
        RecognitionEvent::interim("五天"),
        RecognitionEvent::final_("五天"),
    ]);

    let mut seen = Vec::new();
    let mut capture = FreeTextCapture::with_text("我想去日本");
    capture
        .run(events, |c| seen.push((c.preview().to_string(), c.text().to_string())))
        .await;

    assert_eq!(
        seen,
        vec![
            ("五天".to_string(), "我想去日本".to_string()),
            (String::new(), "我想去日本五天".to_string()),
        ]
    );
    Ok(())
}
