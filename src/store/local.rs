use anyhow::{anyhow, Context, Result};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::kv::{KeyValueStore, WriteBatch};
use crate::model::{sort_newest_first, BucketKey, LedgerEntry, Plan};

const LEDGER_PREFIX: &str = "ai_travel_planner_expenses_";
const PLAN_PREFIX: &str = "ai_travel_planner_plan_";
const PLAN_INDEX_KEY: &str = "ai_travel_planner_plans";
const UNSYNCED_PREFIX: &str = "ai_travel_planner_unsynced_";

/// Local persistence for plans and ledgers
///
/// Every read-modify-write holds the store lock for its whole sequence, so
/// two writers never interleave within one bucket.
pub struct LocalStore {
    kv: Mutex<Box<dyn KeyValueStore>>,
}

fn ledger_key(bucket: &BucketKey) -> String {
    format!("{}{}", LEDGER_PREFIX, bucket)
}

fn plan_key(bucket: &BucketKey) -> String {
    format!("{}{}", PLAN_PREFIX, bucket)
}

fn unsynced_key(bucket: &BucketKey) -> String {
    format!("{}{}", UNSYNCED_PREFIX, bucket)
}

impl LocalStore {
    pub fn new(kv: impl KeyValueStore + 'static) -> Self {
        Self {
            kv: Mutex::new(Box::new(kv)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn KeyValueStore>>> {
        self.kv
            .lock()
            .map_err(|_| anyhow!("Local store lock poisoned"))
    }

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    /// Entries of one bucket, newest first
    pub fn read_ledger_entries(&self, bucket: &BucketKey) -> Result<Vec<LedgerEntry>> {
        let kv = self.lock()?;
        read_ledger(&**kv, bucket)
    }

    /// File an entry under `bucket` and persist the collection
    ///
    /// An entry whose id is already present replaces the stored one. The
    /// entry counts as unsynced until [`LocalStore::mark_synced`].
    pub fn write_ledger_entry(&self, bucket: &BucketKey, entry: LedgerEntry) -> Result<()> {
        let mut kv = self.lock()?;
        let mut entries = read_ledger(&**kv, bucket)?;
        let mut unsynced = read_unsynced(&**kv, bucket)?;

        if !unsynced.contains(&entry.id) {
            unsynced.push(entry.id.clone());
        }
        entries.retain(|e| e.id != entry.id);
        entries.insert(0, entry);
        sort_newest_first(&mut entries);

        let mut batch = WriteBatch::new();
        batch.set(ledger_key(bucket), serde_json::to_string(&entries)?);
        batch.set(unsynced_key(bucket), serde_json::to_string(&unsynced)?);
        kv.commit(batch)
            .with_context(|| format!("Failed to persist ledger {}", bucket))?;

        debug!("Ledger {} now holds {} entries", bucket, entries.len());
        Ok(())
    }

    /// Drop an entry by id. Returns whether anything was removed.
    pub fn remove_ledger_entry(&self, bucket: &BucketKey, id: &str) -> Result<bool> {
        let mut kv = self.lock()?;
        let mut entries = read_ledger(&**kv, bucket)?;
        let before = entries.len();
        entries.retain(|e| e.id != id);

        if entries.len() == before {
            return Ok(false);
        }
        let mut unsynced = read_unsynced(&**kv, bucket)?;
        unsynced.retain(|u| u != id);

        let mut batch = WriteBatch::new();
        batch.set(ledger_key(bucket), serde_json::to_string(&entries)?);
        batch.set(unsynced_key(bucket), serde_json::to_string(&unsynced)?);
        kv.commit(batch)
            .with_context(|| format!("Failed to persist ledger {}", bucket))?;
        Ok(true)
    }

    /// Overwrite a bucket wholesale with entries the remote already holds
    pub fn replace_ledger(&self, bucket: &BucketKey, entries: Vec<LedgerEntry>) -> Result<()> {
        let mut entries = entries;
        sort_newest_first(&mut entries);

        let mut kv = self.lock()?;
        let mut batch = WriteBatch::new();
        batch.set(ledger_key(bucket), serde_json::to_string(&entries)?);
        batch.remove(unsynced_key(bucket));
        kv.commit(batch)
            .with_context(|| format!("Failed to replace ledger {}", bucket))
    }

    /// Entries of `bucket` the remote has not confirmed yet, newest first
    pub fn unsynced_entries(&self, bucket: &BucketKey) -> Result<Vec<LedgerEntry>> {
        let kv = self.lock()?;
        let unsynced = read_unsynced(&**kv, bucket)?;
        Ok(read_ledger(&**kv, bucket)?
            .into_iter()
            .filter(|e| unsynced.contains(&e.id))
            .collect())
    }

    /// Record that the remote now holds entry `id`
    pub fn mark_synced(&self, bucket: &BucketKey, id: &str) -> Result<()> {
        let mut kv = self.lock()?;
        let mut unsynced = read_unsynced(&**kv, bucket)?;
        if !unsynced.iter().any(|u| u == id) {
            return Ok(());
        }
        unsynced.retain(|u| u != id);

        let mut batch = WriteBatch::new();
        batch.set(unsynced_key(bucket), serde_json::to_string(&unsynced)?);
        kv.commit(batch)
            .with_context(|| format!("Failed to persist sync state of {}", bucket))
    }

    /// Replace a bucket with the remote copy, keeping unsynced entries
    ///
    /// Unsynced entries the remote already holds become synced. The rest
    /// stay in the bucket so a later push can still deliver them.
    pub fn merge_remote_ledger(
        &self,
        bucket: &BucketKey,
        remote: Vec<LedgerEntry>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut kv = self.lock()?;
        let mut unsynced = read_unsynced(&**kv, bucket)?;
        unsynced.retain(|id| !remote.iter().any(|e| &e.id == id));

        let kept: Vec<LedgerEntry> = read_ledger(&**kv, bucket)?
            .into_iter()
            .filter(|e| unsynced.contains(&e.id))
            .collect();
        if !kept.is_empty() {
            info!("Keeping {} unsynced entries in {}", kept.len(), bucket);
        }

        let mut entries = kept;
        entries.extend(remote);
        sort_newest_first(&mut entries);

        let mut batch = WriteBatch::new();
        batch.set(ledger_key(bucket), serde_json::to_string(&entries)?);
        batch.set(unsynced_key(bucket), serde_json::to_string(&unsynced)?);
        kv.commit(batch)
            .with_context(|| format!("Failed to replace ledger {}", bucket))?;
        Ok(entries)
    }

    /// Move the whole collection from `old` to `new` in one commit
    ///
    /// Entries already filed under `new` are kept; duplicates by id are
    /// collapsed. Returns how many entries were moved.
    pub fn rekey_bucket(&self, old: &BucketKey, new: &BucketKey) -> Result<usize> {
        if old == new {
            return Ok(0);
        }

        let mut kv = self.lock()?;
        let mut batch = WriteBatch::new();
        let moved = stage_rekey(&**kv, old, new, &mut batch)?;
        kv.commit(batch)
            .with_context(|| format!("Failed to rekey ledger {} -> {}", old, new))?;

        info!("Rekeyed ledger {} -> {} ({} entries)", old, new, moved);
        Ok(moved)
    }

    // ------------------------------------------------------------------
    // Plans
    // ------------------------------------------------------------------

    /// Write a plan under its current bucket key
    pub fn save_plan(&self, plan: &Plan) -> Result<()> {
        let key = plan.bucket_key();
        let mut kv = self.lock()?;

        let mut index = read_index(&**kv)?;
        let mut batch = WriteBatch::new();
        if !index.contains(&key) {
            index.push(key.clone());
            batch.set(PLAN_INDEX_KEY, serde_json::to_string(&index)?);
        }
        batch.set(plan_key(&key), serde_json::to_string(plan)?);

        kv.commit(batch)
            .with_context(|| format!("Failed to persist plan {}", key))
    }

    pub fn load_plan(&self, key: &BucketKey) -> Result<Option<Plan>> {
        let kv = self.lock()?;
        match kv.get(&plan_key(key))? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).with_context(|| format!("Corrupt plan {}", key))?,
            )),
            None => Ok(None),
        }
    }

    /// All locally known plans, in creation order
    pub fn list_plans(&self) -> Result<Vec<Plan>> {
        let kv = self.lock()?;
        let mut plans = Vec::new();
        for key in read_index(&**kv)? {
            if let Some(raw) = kv.get(&plan_key(&key))? {
                plans.push(
                    serde_json::from_str(&raw).with_context(|| format!("Corrupt plan {}", key))?,
                );
            }
        }
        Ok(plans)
    }

    /// Give a draft its remote identity
    ///
    /// The plan record and its ledger move from the draft key to `remote_id`
    /// in a single commit. No-op for a plan that is already remote.
    pub fn promote_draft(&self, plan: &mut Plan, remote_id: &str) -> Result<()> {
        if !plan.is_draft() {
            return Ok(());
        }

        let old = plan.bucket_key();
        let mut promoted = plan.clone();
        promoted.id = Some(remote_id.to_string());
        let new = promoted.bucket_key();

        let mut kv = self.lock()?;
        let mut batch = WriteBatch::new();
        let moved = stage_rekey(&**kv, &old, &new, &mut batch)?;

        let index: Vec<BucketKey> = read_index(&**kv)?
            .into_iter()
            .filter(|k| k != &old && k != &new)
            .chain(std::iter::once(new.clone()))
            .collect();
        batch.set(PLAN_INDEX_KEY, serde_json::to_string(&index)?);
        batch.remove(plan_key(&old));
        batch.set(plan_key(&new), serde_json::to_string(&promoted)?);

        kv.commit(batch)
            .with_context(|| format!("Failed to promote plan {} -> {}", old, new))?;

        info!("Promoted draft {} to {} ({} ledger entries moved)", old, new, moved);
        *plan = promoted;
        Ok(())
    }
}

fn read_ledger(kv: &dyn KeyValueStore, bucket: &BucketKey) -> Result<Vec<LedgerEntry>> {
    match kv.get(&ledger_key(bucket))? {
        Some(raw) => {
            serde_json::from_str(&raw).with_context(|| format!("Corrupt ledger {}", bucket))
        }
        None => Ok(Vec::new()),
    }
}

fn read_unsynced(kv: &dyn KeyValueStore, bucket: &BucketKey) -> Result<Vec<String>> {
    match kv.get(&unsynced_key(bucket))? {
        Some(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt sync state for {}", bucket)),
        None => Ok(Vec::new()),
    }
}

fn read_index(kv: &dyn KeyValueStore) -> Result<Vec<BucketKey>> {
    match kv.get(PLAN_INDEX_KEY)? {
        Some(raw) => serde_json::from_str(&raw).context("Corrupt plan index"),
        None => Ok(Vec::new()),
    }
}

/// Stage the ops moving `old`'s ledger and sync state under `new`.
/// Returns the moved count.
fn stage_rekey(
    kv: &dyn KeyValueStore,
    old: &BucketKey,
    new: &BucketKey,
    batch: &mut WriteBatch,
) -> Result<usize> {
    let moving = read_ledger(kv, old)?;
    batch.remove(unsynced_key(old));
    if moving.is_empty() {
        batch.remove(ledger_key(old));
        return Ok(0);
    }

    let mut unsynced = read_unsynced(kv, new)?;
    for id in read_unsynced(kv, old)? {
        if !unsynced.contains(&id) {
            unsynced.push(id);
        }
    }
    batch.set(unsynced_key(new), serde_json::to_string(&unsynced)?);

    let mut merged = read_ledger(kv, new)?;
    let moved = moving.len();
    for entry in moving.into_iter().rev() {
        merged.retain(|e| e.id != entry.id);
        merged.insert(0, entry);
    }
    sort_newest_first(&mut merged);

    batch.set(ledger_key(new), serde_json::to_string(&merged)?);
    batch.remove(ledger_key(old));
    Ok(moved)
}
