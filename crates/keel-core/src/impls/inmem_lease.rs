//! InMemoryLeaseStore - 開発用の lease store
//!
//! Records are kept serialized, like a real store would keep them in an
//! object annotation or a row, so a decode failure surfaces as
//! `StoreError::Corrupt`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::domain::{LeaseRecord, Versioned};
use crate::error::StoreError;
use crate::ports::LeaseStore;

#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, Versioned<String>>>,
    next_version: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: while unavailable every call fails with
    /// `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn read(&self, name: &str) -> Result<Option<Versioned<LeaseRecord>>, StoreError> {
        self.check_available()?;
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stored) = leases.get(name) else {
            return Ok(None);
        };
        let value: LeaseRecord = serde_json::from_str(&stored.value)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Some(Versioned {
            version: stored.version,
            value,
        }))
    }

    async fn conditional_write(
        &self,
        name: &str,
        expected_version: Option<u64>,
        record: &LeaseRecord,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let encoded =
            serde_json::to_string(record).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        // compare-and-swap under one lock
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let current = leases.get(name).map(|v| v.version);
        if current != expected_version {
            return Err(StoreError::Conflict {
                name: name.to_string(),
            });
        }
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        leases.insert(
            name.to_string(),
            Versioned {
                version,
                value: encoded,
            },
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::domain::HolderIdentity;

    fn record(holder: &str, term: u64) -> LeaseRecord {
        LeaseRecord::acquired(HolderIdentity::new(holder), term, Utc::now(), Duration::from_secs(15))
    }

    #[tokio::test]
    async fn create_then_update_with_version() {
        let store = InMemoryLeaseStore::new();
        assert!(store.read("l").await.unwrap().is_none());

        let v1 = store.conditional_write("l", None, &record("a", 1)).await.unwrap();
        let read = store.read("l").await.unwrap().unwrap();
        assert_eq!(read.version, v1);
        assert_eq!(read.value.term, 1);

        let v2 = store.conditional_write("l", Some(v1), &record("a", 1)).await.unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = InMemoryLeaseStore::new();
        let v1 = store.conditional_write("l", None, &record("a", 1)).await.unwrap();
        store.conditional_write("l", Some(v1), &record("b", 2)).await.unwrap();

        let err = store.conditional_write("l", Some(v1), &record("a", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let err = store.conditional_write("l", None, &record("c", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = InMemoryLeaseStore::new();
        store.set_available(false);
        assert!(matches!(store.read("l").await, Err(StoreError::Unavailable(_))));
        store.set_available(true);
        assert!(store.read("l").await.is_ok());
    }
}
