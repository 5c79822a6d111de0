//! InMemoryChangeSource - 開発用の change feed
//!
//! Holds a set of keys and fans change events out to every live watcher.
//! `disconnect` drops all watchers, which is how tests simulate a lost
//! subscription.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{ChangeEvent, ChangeType, ResourceKey};
use crate::error::SourceError;
use crate::ports::ChangeSource;

const WATCH_BUFFER: usize = 256;

#[derive(Default)]
struct SourceState {
    keys: BTreeSet<ResourceKey>,
    watchers: Vec<mpsc::Sender<ChangeEvent>>,
    offline: bool,
}

#[derive(Default)]
pub struct InMemoryChangeSource {
    state: Mutex<SourceState>,
}

impl InMemoryChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: impl IntoIterator<Item = ResourceKey>) -> Self {
        let source = Self::new();
        source.lock().keys.extend(keys);
        source
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn upsert(&self, key: ResourceKey) {
        let mut state = self.lock();
        let change_type = if state.keys.insert(key.clone()) {
            ChangeType::Added
        } else {
            ChangeType::Modified
        };
        Self::broadcast(&mut state, ChangeEvent::new(key, change_type));
    }

    pub fn delete(&self, key: &ResourceKey) {
        let mut state = self.lock();
        if state.keys.remove(key) {
            Self::broadcast(&mut state, ChangeEvent::new(key.clone(), ChangeType::Deleted));
        }
    }

    /// Drop every watcher. While `offline`, `list` and `watch` fail too.
    pub fn disconnect(&self, offline: bool) {
        let mut state = self.lock();
        state.watchers.clear();
        state.offline = offline;
    }

    pub fn reconnect(&self) {
        self.lock().offline = false;
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    fn broadcast(state: &mut SourceState, event: ChangeEvent) {
        // a full or closed watcher is dropped; it will resync on reconnect
        state
            .watchers
            .retain(|tx| tx.try_send(event.clone()).is_ok());
    }
}

#[async_trait]
impl ChangeSource for InMemoryChangeSource {
    async fn list(&self) -> Result<Vec<ResourceKey>, SourceError> {
        let state = self.lock();
        if state.offline {
            return Err(SourceError::Unavailable("source offline".to_string()));
        }
        Ok(state.keys.iter().cloned().collect())
    }

    async fn watch(&self) -> Result<mpsc::Receiver<ChangeEvent>, SourceError> {
        let mut state = self.lock();
        if state.offline {
            return Err(SourceError::Unavailable("source offline".to_string()));
        }
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        state.watchers.push(tx);
        Ok(rx)
    }
}
