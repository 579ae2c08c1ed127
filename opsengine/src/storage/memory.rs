//! In-memory operation storage with compare-and-swap versioning.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::OperationStorage;
use crate::errors::StorageError;
use crate::operation::ManagedOperation;

/// A concurrent in-memory operation store.
///
/// Mirrors the conflict semantics a versioned database table provides:
/// writes with a stale version fail with [`StorageError::Conflict`],
/// committed writes bump the version and stamp `updated_at`.
#[derive(Debug)]
pub struct InMemoryOperationStorage<O> {
    operations: DashMap<String, O>,
}

impl<O> Default for InMemoryOperationStorage<O> {
    fn default() -> Self {
        Self {
            operations: DashMap::new(),
        }
    }
}

impl<O: ManagedOperation> InMemoryOperationStorage<O> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
        }
    }

    /// Returns the number of stored operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[async_trait]
impl<O: ManagedOperation> OperationStorage<O> for InMemoryOperationStorage<O> {
    async fn get(&self, id: &str) -> Result<O, StorageError> {
        self.operations
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })
    }

    async fn insert(&self, operation: O) -> Result<(), StorageError> {
        let id = operation.id().to_string();
        match self.operations.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StorageError::AlreadyExists { id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(operation);
                Ok(())
            }
        }
    }

    async fn update(&self, mut operation: O) -> Result<O, StorageError> {
        let id = operation.id().to_string();
        let mut entry = self
            .operations
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound { id: id.clone() })?;

        let stored = entry.value().version();
        if stored != operation.version() {
            return Err(StorageError::Conflict {
                id,
                expected: operation.version(),
                actual: stored,
            });
        }

        operation.set_version(stored + 1);
        operation.set_updated_at(Utc::now());
        *entry.value_mut() = operation.clone();
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Operation, OperationState};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_insert_and_get() {
        let storage = InMemoryOperationStorage::new();
        let op = Operation::new("instance-1");
        let id = op.id.clone();

        storage.insert(op).await.unwrap();
        let loaded = storage.get(&id).await.unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_rejected() {
        let storage = InMemoryOperationStorage::new();
        let op = Operation::new("instance-1");

        storage.insert(op.clone()).await.unwrap();
        let err = storage.insert(op).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let storage: InMemoryOperationStorage<Operation> = InMemoryOperationStorage::new();
        let err = storage.get("no-such-op").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_timestamp() {
        let storage = InMemoryOperationStorage::new();
        let op = Operation::new("instance-1");
        let before = op.updated_at;
        storage.insert(op.clone()).await.unwrap();

        let mut changed = op;
        changed.state = OperationState::Succeeded;
        let stored = storage.update(changed).await.unwrap();

        assert_eq!(stored.version, 1);
        assert_eq!(stored.state, OperationState::Succeeded);
        assert!(stored.updated_at >= before);
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let storage = InMemoryOperationStorage::new();
        let op = Operation::new("instance-1");
        storage.insert(op.clone()).await.unwrap();

        // First writer wins.
        storage.update(op.clone()).await.unwrap();

        // Second writer still holds version 0.
        let err = storage.update(op).await.unwrap_err();
        match err {
            StorageError::Conflict { expected, actual, .. } => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
