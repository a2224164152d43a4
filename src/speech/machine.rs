use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::engine::EngineError;
use crate::error::Error;

/// Recognition session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Listening,
    /// Session ended on its own; a restart is pending
    Ending,
    /// Session failed transiently; a restart is pending
    Erroring,
    /// Stopped by the user or by a permission failure. Never restarts.
    Stopped,
}

impl SessionState {
    /// Whether an engine session is (or is being) opened
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Listening)
    }
}

/// Delays before restarting a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub after_end: Duration,
    pub after_error: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            after_end: Duration::from_millis(200),
            after_error: Duration::from_millis(300),
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    StartRequested,
    StopRequested,
    /// Engine accepted the start
    EngineStarted,
    /// Engine refused to start
    StartRejected(EngineError),
    ResultsReceived,
    SessionEnded,
    SessionFailed(String),
    RestartDue,
}

/// Side effects the driver must carry out, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Dispose any previous session, then start a new one
    OpenSession,
    /// Ask the live session to stop
    CloseSession,
    /// Drop the live session's signal receiver
    DisposeSession,
    ScheduleRestart(Duration),
    CancelRestart,
    Report(Error),
}

/// Restart policy for one recognition session slot
///
/// `user_stopped` is the only way to suppress a restart: `ScheduleRestart`
/// is emitted only while it is clear, `StopRequested` sets it and cancels
/// any pending restart, and `RestartDue` re-checks it.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    user_stopped: bool,
    restarts: u64,
    policy: RestartPolicy,
}

impl SessionMachine {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            state: SessionState::Idle,
            user_stopped: false,
            restarts: 0,
            policy,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_stopped(&self) -> bool {
        self.user_stopped
    }

    /// Restart attempts made so far
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        use SessionState::*;

        match (self.state, input) {
            (Idle | Stopped, Input::StartRequested) => {
                self.user_stopped = false;
                self.state = Starting;
                vec![Effect::OpenSession]
            }
            // Duplicate start. A pending stop intent is withdrawn so the
            // session keeps going (or restarts) instead of stopping.
            (Starting | Listening | Ending | Erroring, Input::StartRequested) => {
                self.user_stopped = false;
                Vec::new()
            }

            (Starting | Listening, Input::StopRequested) => {
                self.user_stopped = true;
                vec![Effect::CancelRestart, Effect::CloseSession]
            }
            (Ending | Erroring, Input::StopRequested) => {
                self.user_stopped = true;
                self.state = Stopped;
                vec![Effect::CancelRestart]
            }
            (Idle | Stopped, Input::StopRequested) => {
                self.user_stopped = true;
                self.state = Stopped;
                Vec::new()
            }

            (Starting, Input::EngineStarted | Input::ResultsReceived) => {
                self.state = Listening;
                Vec::new()
            }

            (Starting, Input::StartRejected(EngineError::PermissionDenied(code))) => {
                self.state = Stopped;
                vec![
                    Effect::DisposeSession,
                    Effect::CancelRestart,
                    Effect::Report(Error::PermissionDenied(code)),
                ]
            }
            // Duplicate start or busy device: swallowed, stay in Starting
            // until the engine reports something else.
            (Starting, Input::StartRejected(_)) => Vec::new(),

            (Starting | Listening, Input::SessionEnded) => {
                if self.user_stopped {
                    self.state = Stopped;
                    vec![Effect::DisposeSession, Effect::CancelRestart]
                } else {
                    self.state = Ending;
                    vec![
                        Effect::DisposeSession,
                        Effect::ScheduleRestart(self.policy.after_end),
                    ]
                }
            }

            (Starting | Listening, Input::SessionFailed(code)) => {
                let error = Error::from_recognition_code(&code);
                if error.is_permission_denied() {
                    self.state = Stopped;
                    vec![
                        Effect::DisposeSession,
                        Effect::CancelRestart,
                        Effect::Report(error),
                    ]
                } else if self.user_stopped {
                    self.state = Stopped;
                    vec![
                        Effect::DisposeSession,
                        Effect::CancelRestart,
                        Effect::Report(error),
                    ]
                } else {
                    self.state = Erroring;
                    vec![
                        Effect::DisposeSession,
                        Effect::Report(error),
                        Effect::ScheduleRestart(self.policy.after_error),
                    ]
                }
            }

            (Ending | Erroring, Input::RestartDue) if !self.user_stopped => {
                self.restarts += 1;
                self.state = Starting;
                vec![Effect::OpenSession]
            }

            // Stale or irrelevant input for this state
            _ => Vec::new(),
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(RestartPolicy::default())
    }
}
