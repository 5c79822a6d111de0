//! LeaseStore port - the external linearizable store holding the lease.
//!
//! Any backend offering atomic conditional writes can implement this
//! (a Kubernetes Lease object, an etcd key, a database row with a version
//! column).

use async_trait::async_trait;

use crate::domain::{LeaseRecord, Versioned};
use crate::error::StoreError;

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Current record and its version, `None` if the lease was never created.
    async fn read(&self, name: &str) -> Result<Option<Versioned<LeaseRecord>>, StoreError>;

    /// Write `record` only if the stored version still equals
    /// `expected_version` (`None` means "must not exist yet").
    ///
    /// Returns the new version, or `StoreError::Conflict` when the
    /// precondition failed.
    async fn conditional_write(
        &self,
        name: &str,
        expected_version: Option<u64>,
        record: &LeaseRecord,
    ) -> Result<u64, StoreError>;
}
