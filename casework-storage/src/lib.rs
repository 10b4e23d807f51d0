//! Storage for the casework ledger.
//!
//! A [`KvStore`](traits::KvStore) trait with in-memory and SQLite backends,
//! and the [`VaultStore`](vault_store::VaultStore) that records finalized
//! transitions and answers "which version of this case is live".

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod vault_store;
