use anyhow::{Context, Result};
use futures::Stream;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::capture::{CaptureUpdate, ExpenseCapture};
use crate::error::Error;
use crate::extract::{plan_from_untrusted, ExpenseCandidate, RecordExtractor};
use crate::model::{BucketKey, BudgetReport, LedgerEntry, Plan};
use crate::speech::RecognitionEvent;
use crate::store::LocalFirstStore;
use crate::sync::{RemoteError, RemotePlanSummary, SyncOutcome, SyncReconciler};

/// Trip plans and their expense ledgers, local-first
#[derive(Clone)]
pub struct Planner {
    store: LocalFirstStore,
    sync: SyncReconciler,
    extractor: Arc<dyn RecordExtractor>,
}

impl Planner {
    pub fn new(store: LocalFirstStore, extractor: Arc<dyn RecordExtractor>) -> Self {
        let sync = SyncReconciler::new(store.clone());
        Self {
            store,
            sync,
            extractor,
        }
    }

    pub fn store(&self) -> &LocalFirstStore {
        &self.store
    }

    /// Ask the extractor for a plan and validate it. Nothing is saved.
    pub async fn generate_plan(&self, input: &str) -> Result<Plan> {
        let raw = self.extractor.extract_plan(input).await?;
        let plan = plan_from_untrusted(&raw, input)?;
        info!("Generated plan {:?} with {} days", plan.title, plan.days.len());
        Ok(plan)
    }

    /// Validated candidate for one typed or spoken expense
    pub async fn parse_expense(&self, text: &str) -> Result<ExpenseCandidate, Error> {
        let raw = self.extractor.extract_expense(text).await?;
        Ok(ExpenseCandidate::from_untrusted(&raw, text))
    }

    /// Save locally, mirror remotely, and promote a draft that got an id
    ///
    /// Once the plan is remote, ledger entries the remote has not seen
    /// (recorded as a draft, or whose mirror failed) are pushed too.
    pub async fn save_plan(&self, plan: &mut Plan) -> Result<SyncOutcome> {
        let outcome = self.sync.persist_plan(plan).await?;

        if let SyncOutcome::LocalAndRemote(id) = &outcome {
            if plan.is_draft() {
                self.store
                    .local()
                    .promote_draft(plan, id)
                    .context("Failed to promote draft after remote save")?;
            }
            self.sync.push_unsynced(plan).await?;
        }

        Ok(outcome)
    }

    pub fn open_plan(&self, key: &BucketKey) -> Result<Option<Plan>> {
        self.store.local().load_plan(key)
    }

    pub fn list_local_plans(&self) -> Result<Vec<Plan>> {
        self.store.local().list_plans()
    }

    pub async fn list_remote_plans(&self) -> Result<Vec<RemotePlanSummary>, RemoteError> {
        self.sync.list_remote_plans().await
    }

    /// Ledger for `plan`; the remote copy wins for remote plans
    ///
    /// Unsynced entries are pushed first, and any the remote still lacks
    /// are kept.
    pub async fn load_expenses(&self, plan: &Plan) -> Result<Vec<LedgerEntry>> {
        self.sync.push_unsynced(plan).await?;
        self.store.load_ledger(plan).await
    }

    /// Commit an entry locally, then mirror it in the background
    ///
    /// The returned handle resolves to the remote outcome; dropping it does
    /// not cancel the mirror.
    pub fn add_expense(
        &self,
        plan: &Plan,
        candidate: ExpenseCandidate,
    ) -> Result<(LedgerEntry, JoinHandle<SyncOutcome>)> {
        let entry = candidate.into_entry();
        let bucket = plan.bucket_key();
        self.store.write_ledger_entry(&bucket, entry.clone())?;
        info!("Added {} {} to {}", entry.category, entry.amount, bucket);

        let mirror = self.spawn_mirror(bucket, entry.clone(), plan.id.clone());
        Ok((entry, mirror))
    }

    /// Remove an entry; the remote delete, if any, runs in the background
    pub fn remove_expense(
        &self,
        plan: &Plan,
        id: &str,
    ) -> Result<(bool, Option<JoinHandle<()>>)> {
        self.store
            .remove_ledger_entry(&plan.bucket_key(), id, plan.id.as_deref())
    }

    /// Planned budget vs. locally recorded spend
    pub fn budget_report(&self, plan: &Plan) -> Result<BudgetReport> {
        let entries = self.store.read_ledger_entries(&plan.bucket_key())?;
        Ok(BudgetReport::build(&plan.budget, &entries))
    }

    /// Record spoken expenses into `plan`'s ledger until `events` ends
    ///
    /// Every extracted utterance is committed locally before it is reported
    /// through `on_update`; remote mirrors run in the background. Extraction
    /// failures are reported and skipped.
    pub async fn capture_expenses<S>(
        &self,
        plan: &Plan,
        events: S,
        mut on_update: impl FnMut(&CaptureUpdate),
    ) -> Result<Vec<LedgerEntry>>
    where
        S: Stream<Item = RecognitionEvent>,
    {
        let bucket = plan.bucket_key();
        let mut added = Vec::new();
        let mut first_error = None;

        let mut capture = ExpenseCapture::new();
        capture
            .run(events, self.extractor.as_ref(), |update| {
                if let CaptureUpdate::Extracted { candidate, .. } = &update {
                    let entry = candidate.clone().into_entry();
                    match self.store.write_ledger_entry(&bucket, entry.clone()) {
                        Ok(()) => {
                            self.spawn_mirror(bucket.clone(), entry.clone(), plan.id.clone());
                            added.push(entry);
                        }
                        Err(e) => {
                            error!("Failed to record captured expense in {}: {:#}", bucket, e);
                            first_error.get_or_insert(e);
                        }
                    }
                }
                // Reported once the entry is committed
                on_update(&update);
            })
            .await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(added),
        }
    }

    fn spawn_mirror(
        &self,
        bucket: BucketKey,
        entry: LedgerEntry,
        remote_plan_id: Option<String>,
    ) -> JoinHandle<SyncOutcome> {
        let sync = self.sync.clone();
        tokio::spawn(async move {
            let outcome = sync
                .persist_ledger_entry(&bucket, &entry, remote_plan_id.as_deref())
                .await;
            if let SyncOutcome::LocalRemoteFailed(e) = &outcome {
                warn!("Entry {} stays local only: {}", entry.id, e);
            }
            outcome
        })
    }
}
