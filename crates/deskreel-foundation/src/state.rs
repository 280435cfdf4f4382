use crate::error::SessionError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of one recording session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Recording,
    Paused,
    Stopped,
    Finalizing,
    Done,
    Failed { reason: String },
}

impl SessionState {
    /// True while either capture stream may be running.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed { .. })
    }
}

/// Validated session state holder. All transitions funnel through
/// `transition`, which rejects anything outside the session lifecycle
/// and broadcasts accepted changes to subscribers.
pub struct StateMachine {
    state: Arc<RwLock<SessionState>>,
    state_tx: Sender<SessionState>,
    state_rx: Receiver<SessionState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: SessionState) -> Result<(), SessionError> {
        let mut current = self.state.write();

        let valid = matches!(
            (&*current, &new_state),
            (SessionState::Idle, SessionState::Recording)
                | (SessionState::Idle, SessionState::Failed { .. })
                | (SessionState::Recording, SessionState::Paused)
                | (SessionState::Paused, SessionState::Recording)
                | (SessionState::Recording, SessionState::Stopped)
                | (SessionState::Paused, SessionState::Stopped)
                | (SessionState::Recording, SessionState::Failed { .. })
                | (SessionState::Paused, SessionState::Failed { .. })
                | (SessionState::Stopped, SessionState::Finalizing)
                | (SessionState::Finalizing, SessionState::Done)
                | (SessionState::Finalizing, SessionState::Failed { .. })
        );

        if !valid {
            return Err(SessionError::Fatal(format!(
                "Invalid session transition: {:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!("Session transition: {:?} -> {:?}", *current, new_state);
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<SessionState> {
        self.state_rx.clone()
    }
}
