//! Speech recognition session management
//!
//! This module keeps one recognition session alive across the engine's own
//! stops and transient errors:
//! - `SpeechEngine`: the device or service that produces hypotheses
//! - `SessionMachine`: pure restart policy (inputs in, effects out)
//! - `SessionHandle`: async driver owning the engine and the restart timer
//!
//! A session restarts exactly once per natural end or transient error, and
//! never after the user stopped it or permission was refused.

mod engine;
mod machine;
mod manager;

pub use engine::{EngineError, EngineSignal, Hypothesis, RecognitionEvent, SpeechEngine};
pub use machine::{Effect, Input, RestartPolicy, SessionMachine, SessionState};
pub use manager::{RecognitionEvents, SessionHandle, SessionStatus};
