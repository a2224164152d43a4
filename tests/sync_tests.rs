// Integration tests for opportunistic sync: local writes always land,
// remote writes are best-effort and drafts are promoted exactly once.

mod common;

use anyhow::Result;
use common::{test_identity, FakeExtractor, FakeRemote, RemoteCall};
use serde_json::json;
use std::sync::Arc;
use trip_planner::extract::ExpenseCandidate;
use trip_planner::model::{BucketKey, Category, LedgerEntry, Plan};
use trip_planner::store::{LocalFirstStore, LocalStore, MemoryStore};
use trip_planner::sync::remote::{EXPENSES_TABLE, TRIPS_TABLE};
use trip_planner::sync::{RemoteError, SyncOutcome, SyncReconciler};
use trip_planner::Planner;

fn store_with(remote: &FakeRemote, signed_in: bool) -> LocalFirstStore {
    let identity = signed_in.then(test_identity);
    LocalFirstStore::new(LocalStore::new(MemoryStore::new()), Some(remote.link(identity)))
}

fn planner_with(remote: &FakeRemote, signed_in: bool) -> Planner {
    Planner::new(store_with(remote, signed_in), Arc::new(FakeExtractor::new()))
}

fn lunch() -> ExpenseCandidate {
    ExpenseCandidate {
        amount: 80.0,
        category: Category::Food,
        note: "午饭".to_string(),
    }
}

fn inserts(remote: &FakeRemote, into: &str) -> usize {
    remote
        .calls()
        .iter()
        .filter(|c| matches!(c, RemoteCall::Insert { table, .. } if table == into))
        .count()
}

#[tokio::test]
async fn test_persist_plan_without_identity_stays_local() -> Result<()> {
    let remote = FakeRemote::new();
    let store = store_with(&remote, false);
    let sync = SyncReconciler::new(store.clone());
    let plan = Plan::draft("Kyoto", "five days");

    let outcome = sync.persist_plan(&plan).await?;

    assert_eq!(outcome, SyncOutcome::Local);
    assert!(remote.calls().is_empty());
    let saved = store.local().load_plan(&plan.bucket_key())?;
    assert_eq!(saved.and_then(|p| p.id), None);
    Ok(())
}

#[tokio::test]
async fn test_persist_plan_without_remote_stays_local() -> Result<()> {
    let store = LocalFirstStore::local_only(MemoryStore::new());
    let sync = SyncReconciler::new(store);

    let outcome = sync.persist_plan(&Plan::draft("Kyoto", "")).await?;
    assert_eq!(outcome, SyncOutcome::Local);
    Ok(())
}

#[tokio::test]
async fn test_saved_plan_is_promoted_with_its_ledger() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "five days");
    let draft_key = plan.bucket_key();

    // Expenses recorded before the first save live under the draft key
    planner.store().local().save_plan(&plan)?;
    let (_, mirror) = planner.add_expense(&plan, lunch())?;
    assert_eq!(mirror.await?, SyncOutcome::Local);

    let outcome = planner.save_plan(&mut plan).await?;
    let id = outcome.remote_id().map(str::to_string);
    assert_eq!(id.as_deref(), Some("trips_1"));
    assert_eq!(plan.id, id);

    let key = BucketKey::new("trips_1");
    assert_eq!(planner.store().read_ledger_entries(&key)?.len(), 1);
    assert!(planner.store().read_ledger_entries(&draft_key)?.is_empty());

    // The draft-era entry reached the remote with the promotion
    assert_eq!(remote.rows(EXPENSES_TABLE).len(), 1);
    assert!(planner.store().local().unsynced_entries(&key)?.is_empty());

    let row = &remote.rows(TRIPS_TABLE)[0];
    assert_eq!(row["title"], "Kyoto");
    assert_eq!(row["user_id"], "user-1");

    // Saving again rewrites locally without a second remote row
    let again = planner.save_plan(&mut plan).await?;
    assert_eq!(again, SyncOutcome::LocalAndRemote("trips_1".to_string()));
    assert_eq!(inserts(&remote, TRIPS_TABLE), 1);
    assert_eq!(inserts(&remote, EXPENSES_TABLE), 1);
    Ok(())
}

#[tokio::test]
async fn test_remote_failure_keeps_draft_retryable() -> Result<()> {
    let remote = FakeRemote::new();
    remote.fail_with(RemoteError::Transport("connection refused".to_string()));
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "five days");
    let draft_key = plan.bucket_key();

    let outcome = planner.save_plan(&mut plan).await?;
    assert!(matches!(outcome, SyncOutcome::LocalRemoteFailed(RemoteError::Transport(_))));
    assert!(plan.is_draft());
    assert!(planner.open_plan(&draft_key)?.is_some());

    remote.recover();
    let retry = planner.save_plan(&mut plan).await?;
    assert!(retry.remote_id().is_some());
    assert!(!plan.is_draft());
    assert!(planner.open_plan(&draft_key)?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_missing_user_id_column_retries_without_it() -> Result<()> {
    let remote = FakeRemote::new();
    remote.without_column("user_id");
    let sync = SyncReconciler::new(store_with(&remote, true));

    let outcome = sync.persist_plan(&Plan::draft("Kyoto", "")).await?;

    assert!(outcome.remote_id().is_some());
    assert_eq!(inserts(&remote, TRIPS_TABLE), 2);
    assert!(remote.rows(TRIPS_TABLE)[0].get("user_id").is_none());
    Ok(())
}

#[tokio::test]
async fn test_entry_of_draft_plan_is_not_mirrored() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let plan = Plan::draft("Kyoto", "");

    let (entry, mirror) = planner.add_expense(&plan, lunch())?;
    assert_eq!(mirror.await?, SyncOutcome::Local);
    assert!(remote.calls().is_empty());
    assert_eq!(planner.store().read_ledger_entries(&plan.bucket_key())?, vec![entry]);
    Ok(())
}

#[tokio::test]
async fn test_entry_survives_remote_failure() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "");
    planner.save_plan(&mut plan).await?;

    remote.fail_with(RemoteError::Rejected {
        status: 503,
        message: "unavailable".to_string(),
    });
    let (entry, mirror) = planner.add_expense(&plan, lunch())?;

    assert!(matches!(mirror.await?, SyncOutcome::LocalRemoteFailed(_)));
    assert_eq!(planner.store().read_ledger_entries(&plan.bucket_key())?, vec![entry]);
    Ok(())
}

#[tokio::test]
async fn test_entry_of_remote_plan_is_tagged() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "");
    planner.save_plan(&mut plan).await?;

    let (entry, mirror) = planner.add_expense(&plan, lunch())?;
    assert!(mirror.await?.remote_id().is_some());

    let row = &remote.rows(EXPENSES_TABLE)[0];
    assert_eq!(row["trip_id"], json!(plan.id));
    assert_eq!(row["client_id"], json!(entry.id));
    assert_eq!(row["amount"], json!(80.0));
    Ok(())
}

#[tokio::test]
async fn test_remote_ledger_wins_on_load() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "");
    planner.save_plan(&mut plan).await?;
    let plan_id = plan.id.clone().unwrap_or_default();

    // A cached entry the remote confirmed earlier and has since dropped
    let stale = LedgerEntry::new(1.0, Category::Others, "stale");
    planner.store().local().replace_ledger(&plan.bucket_key(), vec![stale])?;

    remote.seed(
        EXPENSES_TABLE,
        json!({
            "id": 7, "trip_id": plan_id, "client_id": "e-old",
            "amount": 20, "category": "transport", "note": "bus",
            "created_at": "2025-05-01T08:00:00Z"
        }),
    );
    remote.seed(
        EXPENSES_TABLE,
        json!({
            "id": 8, "trip_id": plan_id, "client_id": "e-new",
            "amount": 45, "category": "tickets", "note": "temple",
            "created_at": "2025-05-01T10:00:00Z"
        }),
    );

    let entries = planner.load_expenses(&plan).await?;
    let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e-new", "e-old"]);

    // The local mirror now matches the remote copy
    assert_eq!(planner.store().read_ledger_entries(&plan.bucket_key())?, entries);
    Ok(())
}

#[tokio::test]
async fn test_load_falls_back_to_local_cache() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "");
    planner.save_plan(&mut plan).await?;
    let (entry, mirror) = planner.add_expense(&plan, lunch())?;
    mirror.await?;

    remote.fail_with(RemoteError::Transport("offline".to_string()));
    assert_eq!(planner.load_expenses(&plan).await?, vec![entry]);
    Ok(())
}

#[tokio::test]
async fn test_remove_fires_remote_delete() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "");
    planner.save_plan(&mut plan).await?;
    let (entry, mirror) = planner.add_expense(&plan, lunch())?;
    mirror.await?;

    let (removed, delete) = planner.remove_expense(&plan, &entry.id)?;
    assert!(removed);
    assert!(planner.store().read_ledger_entries(&plan.bucket_key())?.is_empty());

    // The local removal is done before the remote delete runs
    if let Some(delete) = delete {
        delete.await?;
    }
    assert!(remote.rows(EXPENSES_TABLE).is_empty());
    assert!(remote
        .calls()
        .iter()
        .any(|c| matches!(c, RemoteCall::Delete { table, .. } if table == EXPENSES_TABLE)));
    Ok(())
}

#[tokio::test]
async fn test_list_remote_plans() -> Result<()> {
    let remote = FakeRemote::new();
    let anonymous = planner_with(&remote, false);
    assert!(anonymous.list_remote_plans().await?.is_empty());

    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "five days in Kyoto");
    planner.save_plan(&mut plan).await?;

    let trips = planner.list_remote_plans().await?;
    assert_eq!(trips.len(), 1);
    assert_eq!(trips[0].title, "Kyoto");
    assert_eq!(trips[0].input_text, "five days in Kyoto");

    // Served with the same camelCase keys as plans
    let row = serde_json::to_value(&trips[0])?;
    assert_eq!(row["inputText"], "five days in Kyoto");
    assert!(row.get("createdAt").is_some());
    Ok(())
}

#[tokio::test]
async fn test_draft_entries_survive_first_load_after_save() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "");
    planner.store().local().save_plan(&plan)?;

    let (entry, mirror) = planner.add_expense(&plan, lunch())?;
    mirror.await?;
    planner.save_plan(&mut plan).await?;

    let entries = planner.load_expenses(&plan).await?;
    assert_eq!(entries, vec![entry.clone()]);
    assert_eq!(remote.rows(EXPENSES_TABLE)[0]["client_id"], json!(entry.id));
    Ok(())
}

#[tokio::test]
async fn test_failed_mirror_is_pushed_on_load() -> Result<()> {
    let remote = FakeRemote::new();
    let planner = planner_with(&remote, true);
    let mut plan = Plan::draft("Kyoto", "");
    planner.save_plan(&mut plan).await?;

    remote.fail_with(RemoteError::Transport("offline".to_string()));
    let (entry, mirror) = planner.add_expense(&plan, lunch())?;
    assert!(matches!(mirror.await?, SyncOutcome::LocalRemoteFailed(_)));
    assert_eq!(planner.store().local().unsynced_entries(&plan.bucket_key())?, vec![entry.clone()]);

    remote.recover();
    let entries = planner.load_expenses(&plan).await?;
    assert_eq!(entries, vec![entry]);
    assert_eq!(remote.rows(EXPENSES_TABLE).len(), 1);
    assert!(planner.store().local().unsynced_entries(&plan.bucket_key())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unsynced_entry_is_kept_when_remote_lacks_it() -> Result<()> {
    let remote = FakeRemote::new();
    let store = store_with(&remote, true);
    let sync = SyncReconciler::new(store.clone());
    let mut plan = Plan::draft("Kyoto", "");
    plan.id = Some("trips_9".to_string());

    // Written locally, never mirrored
    let entry = LedgerEntry::new(12.0, Category::Transport, "bus");
    store.write_ledger_entry(&plan.bucket_key(), entry.clone())?;

    let entries = store.load_ledger(&plan).await?;
    assert_eq!(entries, vec![entry.clone()]);

    // Once pushed, the remote copy covers it
    let outcomes = sync.push_unsynced(&plan).await?;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(store.load_ledger(&plan).await?, vec![entry]);
    assert!(store.local().unsynced_entries(&plan.bucket_key())?.is_empty());
    Ok(())
}
