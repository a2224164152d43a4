use serde::{Deserialize, Serialize};

use crate::speech::{EngineSignal, Hypothesis};

/// Control message published to the STT service
/// (`stt.control.start` / `stt.control.stop`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub timestamp: String, // RFC3339 timestamp
}

impl ControlMessage {
    pub fn start(session_id: &str, language: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            language: Some(language.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn stop(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            language: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Transcript message received from STT service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub text: String,
    pub partial: bool,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl TranscriptMessage {
    /// One-hypothesis result batch
    pub fn signal(&self) -> EngineSignal {
        let hypothesis = if self.partial {
            Hypothesis::interim(self.text.clone())
        } else {
            Hypothesis::final_(self.text.clone())
        };
        EngineSignal::Results(vec![hypothesis])
    }
}

/// Session lifecycle message received from STT service (`stt.status.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub session_id: String,
    /// `started`, `end` or `error`
    pub event: String,
    /// Error code such as `no-speech` or `not-allowed`
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl StatusMessage {
    /// Terminal signal for this message, if any
    pub fn signal(&self) -> Option<EngineSignal> {
        match self.event.as_str() {
            "end" => Some(EngineSignal::End),
            "error" => Some(EngineSignal::Error(
                self.error.clone().unwrap_or_else(|| "unknown".to_string()),
            )),
            _ => None,
        }
    }
}
