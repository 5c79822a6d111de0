//! Impls - 実装
//!
//! In-memory adapters for the ports, for development and tests.

pub mod inmem_lease;
pub mod inmem_source;

pub use self::inmem_lease::InMemoryLeaseStore;
pub use self::inmem_source::InMemoryChangeSource;
