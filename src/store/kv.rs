use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// One mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set(String, String),
    Remove(String),
}

/// Mutations committed together: readers see all of them or none
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Set(key.into(), value.into()));
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Remove(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    fn apply_to(self, map: &mut BTreeMap<String, String>) {
        for op in self.ops {
            match op {
                WriteOp::Set(k, v) => {
                    map.insert(k, v);
                }
                WriteOp::Remove(k) => {
                    map.remove(&k);
                }
            }
        }
    }
}

/// Synchronous string-keyed local persistence
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Apply every op in `batch` atomically
    fn commit(&mut self, batch: WriteBatch) -> Result<()>;

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set(key, value);
        self.commit(batch)
    }
}

/// Process-lifetime store, used for tests and `--ephemeral` runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).cloned())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<()> {
        batch.apply_to(&mut self.map);
        Ok(())
    }
}

/// Whole-map JSON file
///
/// Each commit writes a temp file next to the target and renames it over,
/// so a crash mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    map: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create storage directory {:?}", parent))?;
        }

        let map = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read local store {:?}", path))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Local store {:?} is not a JSON object", path))?
            }
        } else {
            BTreeMap::new()
        };

        info!("Local store opened: {} ({} keys)", path.display(), map.len());

        Ok(Self { path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(map)?;
        fs::write(&tmp, bytes).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).cloned())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut next = self.map.clone();
        batch.apply_to(&mut next);
        self.flush(&next)?;
        self.map = next;
        Ok(())
    }
}
