use crate::capture::{CaptureUpdate, FreeTextCapture};
use crate::model::{BucketKey, Plan};
use crate::planner::Planner;
use crate::speech::{RecognitionEvent, RecognitionEvents, SessionHandle};
use futures::channel::mpsc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What the capture session's final utterances become
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Dictated plan intent
    #[default]
    Text,
    /// Expenses in one plan's ledger
    Expenses,
}

/// Where the collector sends recognition events
#[derive(Default)]
pub enum CaptureRoute {
    #[default]
    Text,
    Expenses(mpsc::UnboundedSender<RecognitionEvent>),
}

impl CaptureRoute {
    pub fn mode(&self) -> CaptureMode {
        match self {
            Self::Text => CaptureMode::Text,
            Self::Expenses(_) => CaptureMode::Expenses,
        }
    }
}

/// What the latest expense capture has reported
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpenseFeed {
    pub plan: Option<BucketKey>,
    pub preview: String,
    pub updates: Vec<CaptureUpdate>,
    #[serde(skip)]
    generation: u64,
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub planner: Planner,

    /// Voice capture session; `None` when no engine is configured
    pub capture: Option<SessionHandle>,

    /// Text heard so far by the capture session
    pub heard: Arc<RwLock<FreeTextCapture>>,

    pub route: Arc<RwLock<CaptureRoute>>,

    pub expenses: Arc<Mutex<ExpenseFeed>>,
}

impl AppState {
    pub fn new(planner: Planner) -> Self {
        Self {
            planner,
            capture: None,
            heard: Arc::new(RwLock::new(FreeTextCapture::new())),
            route: Arc::new(RwLock::new(CaptureRoute::Text)),
            expenses: Arc::new(Mutex::new(ExpenseFeed::default())),
        }
    }

    /// Attach a capture session and route what it hears
    pub fn with_capture(mut self, handle: SessionHandle, events: RecognitionEvents) -> (Self, JoinHandle<()>) {
        self.capture = Some(handle);
        let heard = self.heard.clone();
        let route = self.route.clone();
        let collector = tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.next().await {
                match &*route.read().await {
                    CaptureRoute::Text => heard.write().await.on_event(&event),
                    CaptureRoute::Expenses(tx) => {
                        if tx.unbounded_send(event).is_err() {
                            warn!("Expense capture has finished; dropping event");
                        }
                    }
                }
            }
        });
        (self, collector)
    }

    pub async fn mode(&self) -> CaptureMode {
        self.route.read().await.mode()
    }

    /// Start a fresh dictation. Any expense capture drains and finishes.
    pub async fn route_to_text(&self) {
        *self.heard.write().await = FreeTextCapture::new();
        *self.route.write().await = CaptureRoute::Text;
    }

    /// End an expense capture, keeping what was dictated before it
    pub async fn end_expense_capture(&self) {
        let mut route = self.route.write().await;
        if matches!(*route, CaptureRoute::Expenses(_)) {
            *route = CaptureRoute::Text;
        }
    }

    /// Record final utterances into `plan`'s ledger until the route changes
    pub async fn route_to_expenses(&self, plan: Plan) -> JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded();
        let generation = match self.expenses.lock() {
            Ok(mut feed) => {
                let generation = feed.generation + 1;
                *feed = ExpenseFeed {
                    plan: Some(plan.bucket_key()),
                    generation,
                    ..ExpenseFeed::default()
                };
                generation
            }
            Err(_) => {
                error!("Expense feed lock poisoned");
                0
            }
        };
        *self.route.write().await = CaptureRoute::Expenses(tx);

        let planner = self.planner.clone();
        let feed = self.expenses.clone();
        tokio::spawn(async move {
            let bucket = plan.bucket_key();
            let result = planner
                .capture_expenses(&plan, rx, |update| record(&feed, generation, update))
                .await;
            match result {
                Ok(added) => info!("Expense capture for {} added {} entries", bucket, added.len()),
                Err(e) => error!("Expense capture for {} failed: {:#}", bucket, e),
            }
        })
    }

    pub fn expense_feed(&self) -> Option<ExpenseFeed> {
        let feed = self.expenses.lock().ok()?;
        feed.plan.is_some().then(|| feed.clone())
    }
}

fn record(feed: &Mutex<ExpenseFeed>, generation: u64, update: &CaptureUpdate) {
    let Ok(mut feed) = feed.lock() else {
        return;
    };
    // A newer capture owns the feed
    if feed.generation != generation {
        return;
    }
    match update {
        CaptureUpdate::Preview(text) => feed.preview.clone_from(text),
        other => feed.updates.push(other.clone()),
    }
}
