use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use super::remote::{
    expense_row, plan_summary_from_row, trip_row, Order, RemoteError, RemotePlanSummary,
    EXPENSES_TABLE, TRIPS_TABLE,
};
use crate::model::{BucketKey, LedgerEntry, Plan};
use crate::store::LocalFirstStore;

/// Result of a local write plus best-effort remote mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Committed locally; no remote attempt was made
    Local,
    /// Committed locally and mirrored under this remote id
    LocalAndRemote(String),
    /// Committed locally; the remote write failed and was not retried
    LocalRemoteFailed(RemoteError),
}

impl SyncOutcome {
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::LocalAndRemote(id) => Some(id),
            _ => None,
        }
    }
}

/// Mirrors local writes to the remote store
///
/// Local state is always committed before any remote attempt and is never
/// rolled back by a remote failure.
#[derive(Clone)]
pub struct SyncReconciler {
    store: LocalFirstStore,
}

impl SyncReconciler {
    pub fn new(store: LocalFirstStore) -> Self {
        Self { store }
    }

    /// Save `plan` locally, then try one remote insert
    ///
    /// On `LocalAndRemote(id)` for a draft the caller must promote the draft
    /// (re-key its bucket to `id`). A plan that already has a remote id is
    /// only rewritten locally. Retrying after a success whose response was
    /// lost creates a second remote row: there is no idempotency key.
    pub async fn persist_plan(&self, plan: &Plan) -> Result<SyncOutcome> {
        self.store.local().save_plan(plan)?;

        if let Some(id) = &plan.id {
            return Ok(SyncOutcome::LocalAndRemote(id.clone()));
        }

        let Some(link) = self.store.remote() else {
            return Ok(SyncOutcome::Local);
        };
        let Some(identity) = link.identity().await else {
            info!("No identity; plan {} stays a local draft", plan.bucket_key());
            return Ok(SyncOutcome::Local);
        };

        let row = match trip_row(plan, Some(&identity.user_id)) {
            Ok(row) => row,
            Err(e) => return Ok(SyncOutcome::LocalRemoteFailed(e)),
        };

        let mut result = link.store().insert(&identity, TRIPS_TABLE, row).await;

        // Older trip tables have no user_id column
        if matches!(&result, Err(e) if e.mentions_column("user_id")) {
            info!("Remote trips table has no user_id column; retrying without it");
            result = match trip_row(plan, None) {
                Ok(row) => link.store().insert(&identity, TRIPS_TABLE, row).await,
                Err(e) => Err(e),
            };
        }

        Ok(match result {
            Ok(id) => {
                info!("Plan {} saved remotely as {}", plan.bucket_key(), id);
                SyncOutcome::LocalAndRemote(id)
            }
            Err(e) => {
                warn!("Remote save of plan {} failed: {}", plan.bucket_key(), e);
                SyncOutcome::LocalRemoteFailed(e)
            }
        })
    }

    /// Mirror an entry that has already been written locally
    ///
    /// Only entries of a remote plan are mirrored. Failures are logged and
    /// not retried.
    pub async fn persist_ledger_entry(
        &self,
        bucket: &BucketKey,
        entry: &LedgerEntry,
        remote_plan_id: Option<&str>,
    ) -> SyncOutcome {
        let Some(plan_id) = remote_plan_id else {
            return SyncOutcome::Local;
        };
        let Some(link) = self.store.remote() else {
            return SyncOutcome::Local;
        };
        let Some(identity) = link.identity().await else {
            info!("No identity; entry {} in {} stays local", entry.id, bucket);
            return SyncOutcome::Local;
        };

        let row = expense_row(entry, plan_id, &identity.user_id);
        match link.store().insert(&identity, EXPENSES_TABLE, row).await {
            Ok(id) => {
                if let Err(e) = self.store.local().mark_synced(bucket, &entry.id) {
                    error!("Entry {} mirrored as {} but not marked synced: {:#}", entry.id, id, e);
                }
                SyncOutcome::LocalAndRemote(id)
            }
            Err(e) => {
                warn!("Remote insert of entry {} in {} failed: {}", entry.id, bucket, e);
                SyncOutcome::LocalRemoteFailed(e)
            }
        }
    }

    /// Mirror every entry of a remote plan the remote has not confirmed
    ///
    /// Covers entries recorded while the plan was a draft and entries whose
    /// first mirror failed. Drafts have nothing to push.
    pub async fn push_unsynced(&self, plan: &Plan) -> Result<Vec<SyncOutcome>> {
        let Some(plan_id) = plan.id.as_deref() else {
            return Ok(Vec::new());
        };
        let bucket = plan.bucket_key();
        let pending = self.store.local().unsynced_entries(&bucket)?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        info!("Pushing {} unsynced entries of {}", pending.len(), bucket);
        let mut outcomes = Vec::with_capacity(pending.len());
        // Oldest first so remote insert order follows the ledger
        for entry in pending.iter().rev() {
            outcomes.push(self.persist_ledger_entry(&bucket, entry, Some(plan_id)).await);
        }
        Ok(outcomes)
    }

    /// The signed-in user's remote plans, newest first
    ///
    /// Empty when there is no remote or no identity.
    pub async fn list_remote_plans(&self) -> Result<Vec<RemotePlanSummary>, RemoteError> {
        let Some(link) = self.store.remote() else {
            return Ok(Vec::new());
        };
        let Some(identity) = link.identity().await else {
            return Ok(Vec::new());
        };

        let rows = link
            .store()
            .select(&identity, TRIPS_TABLE, &[], Some(&Order::desc("created_at")))
            .await?;

        Ok(rows.iter().filter_map(plan_summary_from_row).collect())
    }
}
