// Shared fakes for integration tests: a scriptable speech engine, a canned
// record extractor and an in-memory remote row store.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use trip_planner::error::Error;
use trip_planner::extract::RecordExtractor;
use trip_planner::speech::{EngineError, EngineSignal, SpeechEngine};
use trip_planner::sync::{
    Filter, Identity, Order, RemoteError, RemoteLink, RemoteStore, StaticIdentity,
};

// ============================================================================
// Speech engine
// ============================================================================

#[derive(Default)]
struct EngineState {
    starts: usize,
    stops: usize,
    sessions: Vec<mpsc::Sender<EngineSignal>>,
    scripted_failures: VecDeque<EngineError>,
}

/// Test-side view of a [`FakeEngine`]
#[derive(Clone, Default)]
pub struct EngineController {
    state: Arc<Mutex<EngineState>>,
}

impl EngineController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> Box<dyn SpeechEngine> {
        Box::new(FakeEngine {
            state: self.state.clone(),
        })
    }

    /// Start attempts, including rejected ones
    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    /// Sessions whose receiver is still held by the manager
    pub fn live_sessions(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn fail_next_start(&self, error: EngineError) {
        self.state.lock().unwrap().scripted_failures.push_back(error);
    }

    /// Deliver a signal on the newest session
    pub fn emit(&self, signal: EngineSignal) {
        let state = self.state.lock().unwrap();
        let tx = state.sessions.last().expect("no session was started");
        tx.try_send(signal).expect("session receiver gone");
    }
}

pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
}

#[async_trait::async_trait]
impl SpeechEngine for FakeEngine {
    async fn start(&mut self) -> Result<mpsc::Receiver<EngineSignal>, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(16);
        state.sessions.push(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        // A real engine reports the end of a stopped session
        if let Some(tx) = state.sessions.last() {
            let _ = tx.try_send(EngineSignal::End);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Record extractor
// ============================================================================

/// Extractor answering from a table keyed by input text
#[derive(Default)]
pub struct FakeExtractor {
    expenses: HashMap<String, Value>,
    plans: HashMap<String, Value>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expense(mut self, text: &str, record: Value) -> Self {
        self.expenses.insert(text.to_string(), record);
        self
    }

    pub fn plan(mut self, input: &str, record: Value) -> Self {
        self.plans.insert(input.to_string(), record);
        self
    }

    /// Make every call take this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RecordExtractor for FakeExtractor {
    async fn extract_expense(&self, text: &str) -> Result<Value, Error> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.expenses
            .get(text)
            .cloned()
            .ok_or_else(|| Error::ExtractionFailed(format!("no record for {:?}", text)))
    }

    async fn extract_plan(&self, input: &str) -> Result<Value, Error> {
        self.calls.lock().unwrap().push(input.to_string());
        self.plans
            .get(input)
            .cloned()
            .ok_or_else(|| Error::ExtractionFailed(format!("no plan for {:?}", input)))
    }
}

// ============================================================================
// Remote row store
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Insert { table: String, row: Value },
    Select { table: String },
    Delete { table: String, filters: Vec<Filter> },
}

#[derive(Default)]
struct RemoteState {
    tables: HashMap<String, Vec<Value>>,
    calls: Vec<RemoteCall>,
    next_id: u64,
    fail_with: Option<RemoteError>,
    missing_columns: Vec<String>,
}

/// In-memory row store that records every call
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `error`
    pub fn fail_with(&self, error: RemoteError) {
        self.state.lock().unwrap().fail_with = Some(error);
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().fail_with = None;
    }

    /// Reject rows carrying `column`, like a table without that column
    pub fn without_column(&self, column: &str) {
        self.state
            .lock()
            .unwrap()
            .missing_columns
            .push(column.to_string());
    }

    pub fn seed(&self, table: &str, row: Value) {
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn link(&self, identity: Option<Identity>) -> RemoteLink {
        let provider = match identity {
            Some(identity) => StaticIdentity::signed_in(identity),
            None => StaticIdentity::anonymous(),
        };
        RemoteLink::new(Arc::new(self.clone()), Arc::new(provider))
    }
}

fn row_matches(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| {
        row.get(&f.column).and_then(Value::as_str) == Some(f.value.as_str())
    })
}

#[async_trait::async_trait]
impl RemoteStore for FakeRemote {
    async fn insert(
        &self,
        _identity: &Identity,
        table: &str,
        row: Value,
    ) -> Result<String, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RemoteCall::Insert {
            table: table.to_string(),
            row: row.clone(),
        });
        if let Some(error) = state.fail_with.clone() {
            return Err(error);
        }
        if let Some(column) = state
            .missing_columns
            .iter()
            .find(|c| row.get(c.as_str()).is_some())
        {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("Could not find the '{}' column of '{}'", column, table),
            });
        }

        state.next_id += 1;
        let id = format!("{}_{}", table, state.next_id);
        let mut stored = row;
        stored["id"] = json!(id);
        state.tables.entry(table.to_string()).or_default().push(stored);
        Ok(id)
    }

    async fn select(
        &self,
        _identity: &Identity,
        table: &str,
        filters: &[Filter],
        _order: Option<&Order>,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RemoteCall::Select {
            table: table.to_string(),
        });
        if let Some(error) = state.fail_with.clone() {
            return Err(error);
        }

        let mut rows: Vec<Value> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| row_matches(r, filters)).cloned().collect())
            .unwrap_or_default();
        // Newest first, like `order=created_at.desc`
        rows.sort_by(|a, b| {
            let ts = |r: &Value| r.get("created_at").and_then(Value::as_str).unwrap_or_default().to_string();
            ts(b).cmp(&ts(a))
        });
        Ok(rows)
    }

    async fn delete(
        &self,
        _identity: &Identity,
        table: &str,
        filters: &[Filter],
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RemoteCall::Delete {
            table: table.to_string(),
            filters: filters.to_vec(),
        });
        if let Some(error) = state.fail_with.clone() {
            return Err(error);
        }
        if let Some(rows) = state.tables.get_mut(table) {
            rows.retain(|r| !row_matches(r, filters));
        }
        Ok(())
    }
}

pub fn test_identity() -> Identity {
    Identity {
        user_id: "user-1".to_string(),
        email: Some("traveller@example.com".to_string()),
        access_token: "token".to_string(),
    }
}
