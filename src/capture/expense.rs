use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::extract::{ExpenseCandidate, RecordExtractor};
use crate::speech::RecognitionEvent;

/// What the expense capture reports to its caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CaptureUpdate {
    /// Interim text; empty once a final arrives
    Preview(String),
    /// A validated candidate for one final utterance
    Extracted {
        utterance: String,
        candidate: ExpenseCandidate,
    },
    Failed { utterance: String, error: Error },
}

/// Routes final utterances to the extractor, one call at a time
///
/// A final arriving while a call is in flight is queued; a later final
/// replaces the queued one, so intermediate utterances are dropped.
#[derive(Debug, Default)]
pub struct ExpenseCapture {
    preview: String,
    in_flight: bool,
    pending: Option<String>,
}

impl ExpenseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preview(&self) -> &str {
        &self.preview
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    /// Queued utterance waiting for the in-flight call
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Apply one event; returns the utterance to extract right now, if any
    pub fn on_event(&mut self, event: &RecognitionEvent) -> Option<String> {
        if !event.is_final {
            self.preview.clone_from(&event.text);
            return None;
        }

        self.preview.clear();
        let utterance = event.text.trim();
        if utterance.is_empty() {
            return None;
        }

        if self.in_flight {
            if let Some(dropped) = self.pending.replace(utterance.to_string()) {
                debug!("Dropping queued utterance {:?}", dropped);
            }
            None
        } else {
            self.in_flight = true;
            Some(utterance.to_string())
        }
    }

    /// The in-flight call finished; returns the queued utterance to run next
    pub fn on_extracted(&mut self) -> Option<String> {
        match self.pending.take() {
            Some(next) => Some(next),
            None => {
                self.in_flight = false;
                None
            }
        }
    }

    /// Consume `events`, extracting each final utterance
    ///
    /// Returns once the stream has ended and the in-flight and queued
    /// extractions have completed.
    pub async fn run<S>(
        &mut self,
        events: S,
        extractor: &dyn RecordExtractor,
        mut on_update: impl FnMut(CaptureUpdate),
    ) where
        S: Stream<Item = RecognitionEvent>,
    {
        let mut events = std::pin::pin!(events);
        let mut events_done = false;
        let mut in_flight: Option<BoxFuture<'_, (String, Result<Value, Error>)>> = None;

        loop {
            if events_done && in_flight.is_none() {
                break;
            }

            tokio::select! {
                event = events.next(), if !events_done => {
                    let Some(event) = event else {
                        events_done = true;
                        continue;
                    };
                    let start = self.on_event(&event);
                    on_update(CaptureUpdate::Preview(self.preview.clone()));
                    if let Some(utterance) = start {
                        in_flight = Some(extract(extractor, utterance));
                    }
                }
                (utterance, result) = next_result(&mut in_flight) => {
                    in_flight = None;
                    on_update(validated(utterance, result));
                    if let Some(next) = self.on_extracted() {
                        in_flight = Some(extract(extractor, next));
                    }
                }
            }
        }
    }
}

fn extract(
    extractor: &dyn RecordExtractor,
    utterance: String,
) -> BoxFuture<'_, (String, Result<Value, Error>)> {
    Box::pin(async move {
        info!("Extracting expense from {:?}", utterance);
        let result = extractor.extract_expense(&utterance).await;
        (utterance, result)
    })
}

async fn next_result<T>(in_flight: &mut Option<BoxFuture<'_, T>>) -> T {
    match in_flight {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

fn validated(utterance: String, result: Result<Value, Error>) -> CaptureUpdate {
    match result {
        Ok(value) => {
            let candidate = ExpenseCandidate::from_untrusted(&value, &utterance);
            CaptureUpdate::Extracted {
                utterance,
                candidate,
            }
        }
        Err(error) => {
            warn!("Expense extraction for {:?} failed: {}", utterance, error);
            CaptureUpdate::Failed { utterance, error }
        }
    }
}
