use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One recognition hypothesis inside a result batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub transcript: String,
    pub is_final: bool,
}

impl Hypothesis {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    pub fn final_(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// What a live engine session reports
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// Zero or more hypotheses that changed since the last batch
    Results(Vec<Hypothesis>),
    /// Session ended on its own (silence, timeout) or after `stop()`
    End,
    /// Session failed with an engine error code, e.g. `not-allowed`
    Error(String),
}

/// Why the engine refused to start a session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A session is already running on the device
    #[error("recognition already started")]
    AlreadyStarted,

    #[error("recognition device busy")]
    DeviceBusy,

    /// Microphone or service permission refused (`not-allowed` etc.)
    #[error("recognition permission denied ({0})")]
    PermissionDenied(String),

    #[error("recognition engine unavailable: {0}")]
    Unavailable(String),
}

/// Text delivered to capture consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub text: String,
    pub is_final: bool,
}

impl RecognitionEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    /// Split a result batch into at most one interim and one final event
    ///
    /// Interim hypotheses are concatenated into a single interim event that
    /// replaces any earlier rendering; final hypotheses likewise. The
    /// interim event, if any, comes first.
    pub fn from_batch(batch: &[Hypothesis]) -> Vec<RecognitionEvent> {
        let mut interim = String::new();
        let mut finished = String::new();

        for h in batch {
            if h.is_final {
                finished.push_str(&h.transcript);
            } else {
                interim.push_str(&h.transcript);
            }
        }

        let mut events = Vec::with_capacity(2);
        if !interim.is_empty() {
            events.push(Self::interim(interim));
        }
        if !finished.is_empty() {
            events.push(Self::final_(finished));
        }
        events
    }
}

/// Underlying speech recognition engine
///
/// Implementations:
/// - NATS: an external STT service (see `crate::nats`)
/// - test fakes driven by hand
#[async_trait::async_trait]
pub trait SpeechEngine: Send {
    /// Start a recognition session
    ///
    /// Returns the receiver for that session's signals. Starting again must
    /// release whatever feeds the previous receiver.
    async fn start(&mut self) -> Result<mpsc::Receiver<EngineSignal>, EngineError>;

    /// Ask the live session to finish; it should then signal `End`
    async fn stop(&mut self) -> Result<(), EngineError>;

    /// Engine name for logging
    fn name(&self) -> &str;
}
