//! Capture routing
//!
//! Consumes recognition events in one of two modes:
//! - free text: interim text previews, final text accumulates (plan intent)
//! - structured: each final utterance goes through the record extractor

mod expense;
mod text;

pub use expense::{CaptureUpdate, ExpenseCapture};
pub use text::{join_utterance, FreeTextCapture};
