//! Engine lifecycle state machine.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle state of the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    /// Binding the endpoint.
    Starting,
    /// Accepting requests.
    Ready,
    /// Draining in-flight work; new requests are refused.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::{Ready, ShuttingDown, Starting, Stopped};
        matches!(
            (self, next),
            (Starting, Ready | ShuttingDown | Stopped) | (Ready, ShuttingDown) | (ShuttingDown, Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
        })
    }
}

/// Shared handle to the lifecycle state.
///
/// Clones observe and drive the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A lifecycle in [`LifecycleState::Starting`].
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            state: Arc::new(state),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Whether new requests are accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// Returns whether the state changed. Repeating the current state is a
    /// silent no-op; any other illegal transition is logged and ignored.
    pub fn transition(&self, next: LifecycleState) -> bool {
        let mut from = next;
        let changed = self.state.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            info!(from = %from, to = %next, "lifecycle transition");
        } else if from == next {
            debug!(state = %next, "lifecycle already in state");
        } else {
            warn!(from = %from, to = %next, "ignoring illegal lifecycle transition");
        }
        changed
    }

    /// Waits until the state is `target` or later.
    pub async fn reached(&self, target: LifecycleState) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_legal_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);
        assert!(lifecycle.transition(LifecycleState::Ready));
        assert!(lifecycle.is_ready());
        assert!(lifecycle.transition(LifecycleState::ShuttingDown));
        assert!(!lifecycle.transition(LifecycleState::ShuttingDown));
        assert!(lifecycle.transition(LifecycleState::Stopped));
    }

    #[test]
    fn test_illegal_transitions_ignored() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleState::Ready);
        assert!(!lifecycle.transition(LifecycleState::Stopped));
        assert_eq!(lifecycle.state(), LifecycleState::Ready);

        lifecycle.transition(LifecycleState::ShuttingDown);
        lifecycle.transition(LifecycleState::Stopped);
        assert!(!lifecycle.transition(LifecycleState::Ready));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_reached_wakes_on_transition() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleState::Ready);
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.reached(LifecycleState::ShuttingDown).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        lifecycle.transition(LifecycleState::ShuttingDown);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_state_wire_name() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::ShuttingDown).unwrap(),
            "\"shutting-down\""
        );
    }
}
