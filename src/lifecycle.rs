//! Service lifecycle: Stopped → Starting → Running → Stopping → Stopped,
//! with Failed as the detour for initialization and capture faults.
//! Thread-safe, with a watch channel for reactive subscribers.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

/// All lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "Stopped"),
            LifecycleState::Starting => write!(f, "Starting"),
            LifecycleState::Running => write!(f, "Running"),
            LifecycleState::Stopping => write!(f, "Stopping"),
            LifecycleState::Failed => write!(f, "Failed"),
        }
    }
}

impl LifecycleState {
    /// Whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Stopped, LifecycleState::Starting)
                | (LifecycleState::Starting, LifecycleState::Running)
                | (LifecycleState::Starting, LifecycleState::Failed)
                | (LifecycleState::Running, LifecycleState::Stopping)
                | (LifecycleState::Running, LifecycleState::Failed)
                | (LifecycleState::Stopping, LifecycleState::Stopped)
                | (LifecycleState::Failed, LifecycleState::Stopped)
        )
    }
}

/// Transition notifications surfaced to external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LifecycleEvent {
    /// Resources came up; the scheduler is ticking.
    Initialized,
    /// Resources are fully released.
    Stopped,
    Error { message: String },
}

/// Thread-safe lifecycle state machine with a watch channel for reactive
/// subscribers. Invalid transitions are rejected, which doubles as the
/// re-entrancy guard: a second `start()` fails the Stopped→Starting
/// transition and becomes a no-op.
pub struct ServiceLifecycle {
    state: RwLock<LifecycleState>,
    state_tx: watch::Sender<LifecycleState>,
    state_rx: watch::Receiver<LifecycleState>,
}

impl ServiceLifecycle {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(LifecycleState::Stopped);
        Self {
            state: RwLock::new(LifecycleState::Stopped),
            state_tx,
            state_rx,
        }
    }

    /// Current state (non-blocking read).
    pub fn current(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Attempt a transition. Returns the new state or the rejected pair.
    pub fn transition(&self, next: LifecycleState) -> Result<LifecycleState, InvalidTransition> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid lifecycle transition");
            return Err(InvalidTransition {
                from: current,
                to: next,
            });
        }
        *state = next;
        let _ = self.state_tx.send(next);
        info!(from = %current, to = %next, "lifecycle transition");
        Ok(next)
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_rx.clone()
    }
}

impl Default for ServiceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid lifecycle transition: {} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn happy_path_start_stop_cycle() {
        let lc = ServiceLifecycle::new();
        assert_eq!(lc.current(), Stopped);
        lc.transition(Starting).unwrap();
        lc.transition(Running).unwrap();
        lc.transition(Stopping).unwrap();
        lc.transition(Stopped).unwrap();
        assert_eq!(lc.current(), Stopped);
    }

    #[test]
    fn failed_start_settles_back_to_stopped() {
        let lc = ServiceLifecycle::new();
        lc.transition(Starting).unwrap();
        lc.transition(Failed).unwrap();
        lc.transition(Stopped).unwrap();
        assert_eq!(lc.current(), Stopped);
    }

    #[test]
    fn reentrant_start_and_stop_are_rejected() {
        let lc = ServiceLifecycle::new();
        lc.transition(Starting).unwrap();
        assert!(lc.transition(Starting).is_err());
        lc.transition(Running).unwrap();
        assert!(lc.transition(Running).is_err());
        lc.transition(Stopping).unwrap();
        assert!(lc.transition(Stopping).is_err());
        lc.transition(Stopped).unwrap();
        assert!(lc.transition(Stopped).is_err());
    }

    #[test]
    fn running_may_fail_on_capture_fault() {
        let lc = ServiceLifecycle::new();
        lc.transition(Starting).unwrap();
        lc.transition(Running).unwrap();
        lc.transition(Failed).unwrap();
        lc.transition(Stopped).unwrap();
    }

    #[test]
    fn watch_subscribers_see_the_latest_state() {
        let lc = ServiceLifecycle::new();
        let rx = lc.subscribe();
        lc.transition(Starting).unwrap();
        lc.transition(Running).unwrap();
        assert_eq!(*rx.borrow(), Running);
    }
}
