pub mod client;
pub mod messages;

pub use client::NatsSpeechEngine;
pub use messages::{ControlMessage, StatusMessage, TranscriptMessage};
