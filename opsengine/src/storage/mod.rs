//! Durable, conflict-aware persistence for operations.
//!
//! The trait is the seam for real backends (a SQL table with a version
//! column and `UPDATE ... WHERE version = expected` writes); the in-memory
//! implementation backs tests and local runs.

mod memory;

pub use memory::InMemoryOperationStorage;

use async_trait::async_trait;

use crate::errors::StorageError;
use crate::operation::ManagedOperation;

/// Conflict-aware CRUD for operations.
///
/// `update` must fail with [`StorageError::Conflict`] when the written
/// operation carries a stale version, and must bump the version and stamp
/// `updated_at` on every committed write.
#[async_trait]
pub trait OperationStorage<O: ManagedOperation>: Send + Sync {
    /// Loads the operation with the given id.
    async fn get(&self, id: &str) -> Result<O, StorageError>;

    /// Inserts a new operation.
    async fn insert(&self, operation: O) -> Result<(), StorageError>;

    /// Persists the operation, returning the stored copy with the bumped
    /// version.
    async fn update(&self, operation: O) -> Result<O, StorageError>;
}
