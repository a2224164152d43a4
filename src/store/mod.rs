//! Local-first persistence
//!
//! Local reads and writes are synchronous and never depend on the network.
//! The remote mirror is best-effort:
//! - removals issue a fire-and-forget remote delete
//! - loading a remote plan's ledger lets the remote copy win over
//!   entries it has already confirmed
//! - without a remote link or identity everything stays local

mod kv;
mod local;

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::model::{BucketKey, LedgerEntry, Plan};
use crate::sync::remote::{entry_from_row, Filter, Order, RemoteLink, EXPENSES_TABLE};

pub use kv::{FileStore, KeyValueStore, MemoryStore, WriteBatch, WriteOp};
pub use local::LocalStore;

/// Local store plus an optional remote mirror
#[derive(Clone)]
pub struct LocalFirstStore {
    local: Arc<LocalStore>,
    remote: Option<RemoteLink>,
}

impl LocalFirstStore {
    pub fn new(local: LocalStore, remote: Option<RemoteLink>) -> Self {
        Self {
            local: Arc::new(local),
            remote,
        }
    }

    /// Purely local store, no remote mirror
    pub fn local_only(kv: impl KeyValueStore + 'static) -> Self {
        Self::new(LocalStore::new(kv), None)
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> Option<&RemoteLink> {
        self.remote.as_ref()
    }

    pub fn write_ledger_entry(&self, bucket: &BucketKey, entry: LedgerEntry) -> Result<()> {
        self.local.write_ledger_entry(bucket, entry)
    }

    pub fn read_ledger_entries(&self, bucket: &BucketKey) -> Result<Vec<LedgerEntry>> {
        self.local.read_ledger_entries(bucket)
    }

    pub fn rekey_bucket(&self, old: &BucketKey, new: &BucketKey) -> Result<usize> {
        self.local.rekey_bucket(old, new)
    }

    /// Remove locally, then fire off a remote delete
    ///
    /// The remote delete only happens for entries of a remote plan. Its
    /// handle is returned for callers that must outlive it; failure is
    /// logged.
    pub fn remove_ledger_entry(
        &self,
        bucket: &BucketKey,
        id: &str,
        remote_plan_id: Option<&str>,
    ) -> Result<(bool, Option<JoinHandle<()>>)> {
        let removed = self.local.remove_ledger_entry(bucket, id)?;

        let (Some(link), Some(plan_id)) = (self.remote.clone(), remote_plan_id) else {
            return Ok((removed, None));
        };

        let id = id.to_string();
        let plan_id = plan_id.to_string();
        let delete = tokio::spawn(async move {
            let Some(identity) = link.identity().await else {
                info!("No identity; entry {} removed locally only", id);
                return;
            };
            let filters = [Filter::eq("trip_id", plan_id), Filter::eq("client_id", id.clone())];
            if let Err(e) = link.store().delete(&identity, EXPENSES_TABLE, &filters).await {
                warn!("Remote delete of entry {} failed: {}", id, e);
            }
        });

        Ok((removed, Some(delete)))
    }

    /// Ledger for a plan being opened
    ///
    /// For a plan with a remote identity the remote rows replace the local
    /// bucket, except for entries the remote has not confirmed yet. Drafts
    /// and remote failures fall back to the local cache.
    pub async fn load_ledger(&self, plan: &Plan) -> Result<Vec<LedgerEntry>> {
        let bucket = plan.bucket_key();

        let (Some(link), Some(plan_id)) = (self.remote.as_ref(), plan.id.as_deref()) else {
            return self.local.read_ledger_entries(&bucket);
        };
        let Some(identity) = link.identity().await else {
            return self.local.read_ledger_entries(&bucket);
        };

        let rows = link
            .store()
            .select(
                &identity,
                EXPENSES_TABLE,
                &[Filter::eq("trip_id", plan_id)],
                Some(&Order::desc("created_at")),
            )
            .await;

        match rows {
            Ok(rows) => {
                let entries: Vec<LedgerEntry> = rows.iter().filter_map(entry_from_row).collect();
                info!("Remote ledger for {} has {} entries; replacing local", plan_id, entries.len());
                self.local.merge_remote_ledger(&bucket, entries)
            }
            Err(e) => {
                warn!("Remote ledger for {} unavailable ({}); using local cache", plan_id, e);
                self.local.read_ledger_entries(&bucket)
            }
        }
    }
}
