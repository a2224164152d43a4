pub mod capture;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod model;
pub mod nats;
pub mod planner;
pub mod speech;
pub mod store;
pub mod sync;

pub use capture::{CaptureUpdate, ExpenseCapture, FreeTextCapture};
pub use config::Config;
pub use error::Error;
pub use extract::{ExpenseCandidate, HttpExtractor, RecordExtractor};
pub use http::{create_router, AppState};
pub use model::{BucketKey, Category, LedgerEntry, Plan};
pub use nats::NatsSpeechEngine;
pub use planner::Planner;
pub use speech::{RecognitionEvent, RestartPolicy, SessionHandle, SessionState, SpeechEngine};
pub use store::{FileStore, LocalFirstStore, LocalStore, MemoryStore};
pub use sync::{RestRemoteStore, SyncOutcome, SyncReconciler};
