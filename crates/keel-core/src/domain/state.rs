//! Process lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Lifecycle of the whole controller process.
///
/// State transitions:
/// - NotStarted -> Starting -> Running -> Draining -> Stopped
/// - Starting -> Draining (shutdown requested before the workers came up)
/// - NotStarted -> Stopped (never started)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopState {
    NotStarted,
    Starting,
    Running,
    Draining,
    Stopped,
}

impl LoopState {
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (NotStarted, Stopped)
                | (Starting, Running)
                | (Starting, Draining)
                | (Running, Draining)
                | (Draining, Stopped)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: LoopState) -> Result<LoopState, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Stopped)
    }
}
