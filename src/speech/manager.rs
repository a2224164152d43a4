use anyhow::{anyhow, Result};
use futures::Stream;
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::engine::{EngineError, EngineSignal, RecognitionEvent, SpeechEngine};
use super::machine::{Effect, Input, RestartPolicy, SessionMachine, SessionState};
use crate::error::Error;

/// Snapshot published after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_error: Option<Error>,
    pub restarts: u64,
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
}

/// Lazy stream of recognition events
///
/// Ends once the session manager has shut down.
pub struct RecognitionEvents {
    rx: mpsc::UnboundedReceiver<RecognitionEvent>,
}

impl Stream for RecognitionEvents {
    type Item = RecognitionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Cloneable control surface for a running session manager
///
/// When the last handle is dropped the manager stops the live session and
/// exits.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Spawn a manager for `engine` on the current tokio runtime
    pub fn spawn(
        engine: Box<dyn SpeechEngine>,
        policy: RestartPolicy,
    ) -> (Self, RecognitionEvents, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let machine = SessionMachine::new(policy);
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            state: machine.state(),
            last_error: None,
            restarts: 0,
        });

        let manager = SessionManager {
            engine,
            machine,
            session: None,
            restart_at: None,
            last_error: None,
            events: events_tx,
            status: status_tx,
        };
        let task = tokio::spawn(manager.run(commands_rx));

        (
            Self {
                commands: commands_tx,
                status: status_rx,
            },
            RecognitionEvents { rx: events_rx },
            task,
        )
    }

    /// Begin listening. A duplicate start is swallowed.
    pub fn start(&self) -> Result<()> {
        self.commands
            .send(Command::Start)
            .map_err(|_| anyhow!("Session manager has shut down"))
    }

    /// Stop listening and suppress any restart
    pub fn stop(&self) -> Result<()> {
        self.commands
            .send(Command::Stop)
            .map_err(|_| anyhow!("Session manager has shut down"))
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Wait until the published status satisfies `pred`
    pub async fn wait_for(&self, pred: impl FnMut(&SessionStatus) -> bool) -> Result<SessionStatus> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(pred)
            .await
            .map_err(|_| anyhow!("Session manager has shut down"))?;
        Ok(status.clone())
    }
}

/// The single live engine session
struct LiveSession {
    generation: u64,
    signals: mpsc::Receiver<EngineSignal>,
}

enum Wake {
    Command(Option<Command>),
    Signal(Option<EngineSignal>),
    RestartDue,
}

/// Drives a [`SessionMachine`] against a real engine
struct SessionManager {
    engine: Box<dyn SpeechEngine>,
    machine: SessionMachine,
    session: Option<LiveSession>,
    restart_at: Option<Instant>,
    last_error: Option<Error>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    status: watch::Sender<SessionStatus>,
}

impl SessionManager {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Session manager started (engine: {})", self.engine.name());

        loop {
            let restart_at = self.restart_at;
            let wake = tokio::select! {
                cmd = commands.recv() => Wake::Command(cmd),
                signal = next_signal(&mut self.session) => Wake::Signal(signal),
                _ = restart_timer(restart_at) => Wake::RestartDue,
            };

            match wake {
                Wake::Command(Some(Command::Start)) => self.dispatch(Input::StartRequested).await,
                Wake::Command(Some(Command::Stop)) => self.dispatch(Input::StopRequested).await,
                Wake::Command(None) => break,
                Wake::Signal(Some(EngineSignal::Results(batch))) => {
                    for event in RecognitionEvent::from_batch(&batch) {
                        // Nobody listening is fine
                        let _ = self.events.send(event);
                    }
                    self.dispatch(Input::ResultsReceived).await;
                }
                Wake::Signal(Some(EngineSignal::End)) | Wake::Signal(None) => {
                    self.dispatch(Input::SessionEnded).await;
                }
                Wake::Signal(Some(EngineSignal::Error(code))) => {
                    warn!("Recognition error: {}", code);
                    self.dispatch(Input::SessionFailed(code)).await;
                }
                Wake::RestartDue => {
                    self.restart_at = None;
                    self.dispatch(Input::RestartDue).await;
                }
            }
        }

        if self.session.take().is_some() {
            if let Err(e) = self.engine.stop().await {
                error!("Failed to stop engine on shutdown: {}", e);
            }
        }
        info!("Session manager stopped");
    }

    /// Feed one input through the machine, carrying out its effects
    async fn dispatch(&mut self, input: Input) {
        let mut pending = VecDeque::from([input]);

        while let Some(input) = pending.pop_front() {
            let from = self.machine.state();
            debug!("Session input {:?} in {:?}", input, from);

            for effect in self.machine.handle(input) {
                match effect {
                    Effect::OpenSession => {
                        if let Some(next) = self.open_session().await {
                            pending.push_back(next);
                        }
                    }
                    Effect::CloseSession => {
                        if self.session.is_none() {
                            // Nothing live to wait for
                            pending.push_back(Input::SessionEnded);
                        } else if let Err(e) = self.engine.stop().await {
                            warn!("Engine stop failed ({}); treating session as ended", e);
                            self.session = None;
                            pending.push_back(Input::SessionEnded);
                        }
                    }
                    Effect::DisposeSession => {
                        if let Some(old) = self.session.take() {
                            debug!("Disposed session #{}", old.generation);
                        }
                    }
                    Effect::ScheduleRestart(delay) => {
                        debug!("Restart scheduled in {:?}", delay);
                        self.restart_at = Some(Instant::now() + delay);
                    }
                    Effect::CancelRestart => self.restart_at = None,
                    Effect::Report(error) => self.last_error = Some(error),
                }
            }

            let to = self.machine.state();
            if from != to {
                info!("Session {:?} -> {:?}", from, to);
            }
        }

        self.publish();
    }

    async fn open_session(&mut self) -> Option<Input> {
        // At most one live session: drop the old receiver first
        let generation = match self.session.take() {
            Some(old) => old.generation + 1,
            None => self.machine.restarts() + 1,
        };

        match self.engine.start().await {
            Ok(signals) => {
                info!("Recognition session #{} started", generation);
                self.session = Some(LiveSession {
                    generation,
                    signals,
                });
                Some(Input::EngineStarted)
            }
            Err(EngineError::PermissionDenied(code)) => {
                error!("Recognition permission denied: {}", code);
                Some(Input::StartRejected(EngineError::PermissionDenied(code)))
            }
            Err(e) => {
                warn!("Recognition start failed, ignoring: {}", e);
                Some(Input::StartRejected(e))
            }
        }
    }

    fn publish(&self) {
        let status = SessionStatus {
            state: self.machine.state(),
            last_error: self.last_error.clone(),
            restarts: self.machine.restarts(),
        };
        self.status.send_replace(status);
    }
}

async fn next_signal(session: &mut Option<LiveSession>) -> Option<EngineSignal> {
    match session {
        Some(live) => live.signals.recv().await,
        None => std::future::pending().await,
    }
}

async fn restart_timer(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
