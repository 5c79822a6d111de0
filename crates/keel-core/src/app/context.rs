//! LifecycleContext - owns the LoopState of one controller instance.
//!
//! Passed explicitly to the supervisor and the health probe instead of a
//! process-wide singleton.

use tokio::sync::watch;

use crate::domain::LoopState;
use crate::error::LifecycleError;

#[derive(Debug)]
pub struct LifecycleContext {
    state: watch::Sender<LoopState>,
}

impl LifecycleContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LoopState::NotStarted);
        Self { state }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Validated transition; observers are notified on success.
    pub fn transition(&self, next: LoopState) -> Result<LoopState, LifecycleError> {
        let mut result = Ok(next);
        self.state.send_if_modified(|current| match current.transition(next) {
            Ok(state) => {
                *current = state;
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Resolves once the state equals `target`.
    pub async fn wait_for(&self, target: LoopState) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }
}

impl Default for LifecycleContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_happy_path() {
        let ctx = LifecycleContext::new();
        for next in [
            LoopState::Starting,
            LoopState::Running,
            LoopState::Draining,
            LoopState::Stopped,
        ] {
            assert_eq!(ctx.transition(next), Ok(next));
        }
        assert_eq!(ctx.state(), LoopState::Stopped);
    }

    #[test]
    fn invalid_transition_keeps_state() {
        let ctx = LifecycleContext::new();
        assert!(ctx.transition(LoopState::Running).is_err());
        assert_eq!(ctx.state(), LoopState::NotStarted);
    }

    #[tokio::test]
    async fn observers_see_transitions() {
        let ctx = std::sync::Arc::new(LifecycleContext::new());
        let waiter = tokio::spawn({
            let ctx = std::sync::Arc::clone(&ctx);
            async move { ctx.wait_for(LoopState::Running).await }
        });
        ctx.transition(LoopState::Starting).unwrap();
        ctx.transition(LoopState::Running).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
