//! Persistence seams for workshops and directory users.
//!
//! Workshop rows carry a `revision` that the store checks and bumps on every
//! save, so callers doing fetch-check-mutate-save learn when they lost a
//! race and can rerun their checks against a fresh snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::types::{User, UserId, Workshop, WorkshopId};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Compare-and-swap lost: the row changed (or vanished) since the fetch.
    #[error("revision conflict")]
    RevisionConflict,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workshop persistence with optimistic concurrency on `revision`.
#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn get_workshop(&self, id: &WorkshopId) -> StoreResult<Option<Workshop>>;

    async fn list_workshops(&self) -> StoreResult<Vec<Workshop>>;

    async fn insert_workshop(&self, workshop: Workshop) -> StoreResult<Workshop>;

    /// Persists `workshop` only if the stored revision still equals
    /// `workshop.revision`, then bumps the revision and refreshes
    /// `updated_at`. Returns the row as stored.
    async fn save_workshop(&self, workshop: Workshop) -> StoreResult<Workshop>;

    async fn delete_workshop(&self, id: &WorkshopId) -> StoreResult<bool>;
}

/// User directory persistence. Email addresses are unique across the
/// directory; a duplicate insert or update fails with [`StoreError::Conflict`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    async fn insert_user(&self, user: User) -> StoreResult<User>;

    /// Upsert by id; `created_at` of an existing row is preserved.
    async fn update_user(&self, user: User) -> StoreResult<User>;

    async fn delete_user(&self, id: &UserId) -> StoreResult<bool>;
}

/// Storage backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Shared handles to the configured backend. Both traits are served by the
/// same underlying store.
#[derive(Clone)]
pub struct Stores {
    pub roster: Arc<dyn RosterStore>,
    pub users: Arc<dyn UserStore>,
}

/// Connects the configured backend and prepares its schema.
pub async fn connect(config: &StorageConfig) -> StoreResult<Stores> {
    match config {
        StorageConfig::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                roster: store.clone(),
                users: store,
            })
        }
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = Arc::new(PostgresStore::connect(database_url, *max_connections).await?);
            store.ensure_schema().await?;
            Ok(Stores {
                roster: store.clone(),
                users: store,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_memory() {
        assert_eq!(StorageConfig::default(), StorageConfig::Memory);
        assert_eq!(StorageConfig::default().label(), "memory");
    }

    #[test]
    fn postgres_config_round_trips_through_serde() {
        let config = StorageConfig::postgres("postgres://localhost/atelier", 8);
        assert_eq!(config.label(), "postgres");

        let json = serde_json::to_string(&config).unwrap();
        let parsed: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
