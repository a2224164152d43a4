use async_nats::{Client, Subscriber};
use futures::stream::StreamExt;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{ControlMessage, StatusMessage, TranscriptMessage};
use crate::speech::{EngineError, EngineSignal, SpeechEngine};

const TRANSCRIPT_SUBJECT: &str = "stt.text.>";
const STATUS_SUBJECT: &str = "stt.status.>";

/// Speech engine backed by an external STT service over NATS
///
/// The service publishes transcripts to `stt.text.partial` / `stt.text.final`
/// and lifecycle events to `stt.status.*`; we filter by `session_id` in the
/// payload.
pub struct NatsSpeechEngine {
    url: String,
    session_id: String,
    language: String,
    client: Option<Client>,
    forwarder: Option<JoinHandle<()>>,
}

impl NatsSpeechEngine {
    pub fn new(url: impl Into<String>, session_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session_id: session_id.into(),
            language: language.into(),
            client: None,
            forwarder: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn client(&mut self) -> Result<Client, EngineError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        info!("Connecting to NATS at {}", self.url);
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| EngineError::Unavailable(format!("NATS connect failed: {}", e)))?;
        info!("Connected to NATS successfully");

        self.client = Some(client.clone());
        Ok(client)
    }

    async fn publish_control(
        client: &Client,
        subject: &'static str,
        message: &ControlMessage,
    ) -> Result<(), EngineError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        client
            .publish(subject, payload.into())
            .await
            .map_err(|e| EngineError::Unavailable(format!("publish to {} failed: {}", subject, e)))?;

        debug!("Published {} for session {}", subject, message.session_id);
        Ok(())
    }

    async fn subscribe(client: &Client, subject: &'static str) -> Result<Subscriber, EngineError> {
        client
            .subscribe(subject)
            .await
            .map_err(|e| EngineError::Unavailable(format!("subscribe to {} failed: {}", subject, e)))
    }
}

#[async_trait::async_trait]
impl SpeechEngine for NatsSpeechEngine {
    async fn start(&mut self) -> Result<mpsc::Receiver<EngineSignal>, EngineError> {
        if let Some(old) = self.forwarder.take() {
            old.abort();
        }

        let client = self.client().await?;
        let transcripts = Self::subscribe(&client, TRANSCRIPT_SUBJECT).await?;
        let statuses = Self::subscribe(&client, STATUS_SUBJECT).await?;

        // Subscribed before the start request so no early transcript is lost
        let (tx, rx) = mpsc::channel(64);
        let forwarder = tokio::spawn(forward(
            self.session_id.clone(),
            transcripts,
            statuses,
            tx,
        ));

        let start = ControlMessage::start(&self.session_id, &self.language);
        let request = Self::publish_control(&client, "stt.control.start", &start);
        self.forwarder = Some(relay_once_requested(forwarder, request).await?);

        info!("Requested STT session {} ({})", self.session_id, self.language);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        let Some(client) = self.client.clone() else {
            return Err(EngineError::Unavailable("not connected".to_string()));
        };

        let stop = ControlMessage::stop(&self.session_id);
        Self::publish_control(&client, "stt.control.stop", &stop).await
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Keep `forwarder` only if `request` succeeds
///
/// On failure the forwarder is aborted, which drops its subscriptions and
/// closes the session's signal channel.
async fn relay_once_requested(
    forwarder: JoinHandle<()>,
    request: impl Future<Output = Result<(), EngineError>>,
) -> Result<JoinHandle<()>, EngineError> {
    match request.await {
        Ok(()) => Ok(forwarder),
        Err(e) => {
            warn!("STT start request failed; dropping subscriptions");
            forwarder.abort();
            Err(e)
        }
    }
}

/// Relay one session's messages until it ends or the receiver goes away
async fn forward(
    session_id: String,
    mut transcripts: Subscriber,
    mut statuses: Subscriber,
    tx: mpsc::Sender<EngineSignal>,
) {
    loop {
        let signal = tokio::select! {
            Some(msg) = transcripts.next() => {
                match serde_json::from_slice::<TranscriptMessage>(&msg.payload) {
                    Ok(t) if t.session_id == session_id => Some(t.signal()),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Failed to parse transcript message: {}", e);
                        None
                    }
                }
            }
            Some(msg) = statuses.next() => {
                match serde_json::from_slice::<StatusMessage>(&msg.payload) {
                    Ok(s) if s.session_id == session_id => s.signal(),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Failed to parse status message: {}", e);
                        None
                    }
                }
            }
            else => {
                warn!("NATS subscriptions closed for session {}", session_id);
                let _ = tx.send(EngineSignal::Error("network".to_string())).await;
                break;
            }
        };

        let Some(signal) = signal else {
            continue;
        };
        let terminal = matches!(signal, EngineSignal::End | EngineSignal::Error(_));

        if tx.send(signal).await.is_err() {
            debug!("Session {} receiver dropped; forwarder exiting", session_id);
            break;
        }
        if terminal {
            break;
        }
    }
}
