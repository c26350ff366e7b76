//! In-memory backend for tests and single-process deployments.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{RosterStore, StoreError, StoreResult, UserStore};
use crate::types::{User, UserId, Workshop, WorkshopId};

/// HashMap-backed store; one lock per entity map. The write lock makes the
/// revision check and the overwrite a single atomic step.
#[derive(Default)]
pub struct MemoryStore {
    workshops: RwLock<HashMap<WorkshopId, Workshop>>,
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RosterStore for MemoryStore {
    async fn get_workshop(&self, id: &WorkshopId) -> StoreResult<Option<Workshop>> {
        Ok(self.workshops.read().await.get(id).cloned())
    }

    async fn list_workshops(&self) -> StoreResult<Vec<Workshop>> {
        let mut all: Vec<Workshop> = self.workshops.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn insert_workshop(&self, workshop: Workshop) -> StoreResult<Workshop> {
        let mut workshops = self.workshops.write().await;
        if workshops.contains_key(&workshop.id) {
            return Err(StoreError::Conflict(format!(
                "workshop {} already exists",
                workshop.id
            )));
        }
        workshops.insert(workshop.id.clone(), workshop.clone());
        Ok(workshop)
    }

    async fn save_workshop(&self, mut workshop: Workshop) -> StoreResult<Workshop> {
        let mut workshops = self.workshops.write().await;
        let current = workshops
            .get(&workshop.id)
            .ok_or(StoreError::RevisionConflict)?;
        if current.revision != workshop.revision {
            return Err(StoreError::RevisionConflict);
        }
        workshop.revision += 1;
        workshop.updated_at = Utc::now();
        workshops.insert(workshop.id.clone(), workshop.clone());
        Ok(workshop)
    }

    async fn delete_workshop(&self, id: &WorkshopId) -> StoreResult<bool> {
        Ok(self.workshops.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut all: Vec<User> = self.users.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!(
                "email {} already in use",
                user.email
            )));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(StoreError::Conflict(format!(
                "email {} already in use",
                user.email
            )));
        }
        let mut stored = user;
        if let Some(existing) = users.get(&stored.id) {
            stored.created_at = existing.created_at;
        }
        users.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_user(&self, id: &UserId) -> StoreResult<bool> {
        Ok(self.users.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewWorkshop, Role};
    use chrono::Duration;

    fn test_workshop(name: &str) -> Workshop {
        Workshop::new(NewWorkshop {
            name: name.to_string(),
            description: "desc".to_string(),
            start_date: Utc::now() + Duration::days(1),
            vacancy_total: 4,
            status: None,
            teachers: Vec::new(),
            tutors: Vec::new(),
        })
    }

    #[tokio::test]
    async fn workshop_crud_round_trip() {
        let store = MemoryStore::new();
        let created = store.insert_workshop(test_workshop("A")).await.unwrap();

        let fetched = store.get_workshop(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "A");

        assert!(store.delete_workshop(&created.id).await.unwrap());
        assert!(!store.delete_workshop(&created.id).await.unwrap());
        assert!(store.get_workshop(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_workshop_id_is_rejected() {
        let store = MemoryStore::new();
        let workshop = test_workshop("A");
        store.insert_workshop(workshop.clone()).await.unwrap();
        assert!(matches!(
            store.insert_workshop(workshop).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn save_bumps_revision_and_rejects_stale_writers() {
        let store = MemoryStore::new();
        let created = store.insert_workshop(test_workshop("A")).await.unwrap();

        let first = store.get_workshop(&created.id).await.unwrap().unwrap();
        let second = store.get_workshop(&created.id).await.unwrap().unwrap();

        let mut updated = first.clone();
        updated.name = "A prime".to_string();
        let saved = store.save_workshop(updated).await.unwrap();
        assert_eq!(saved.revision, first.revision + 1);

        // `second` still carries the old revision and must lose.
        assert!(matches!(
            store.save_workshop(second).await,
            Err(StoreError::RevisionConflict)
        ));
    }

    #[tokio::test]
    async fn save_after_delete_is_a_conflict() {
        let store = MemoryStore::new();
        let created = store.insert_workshop(test_workshop("A")).await.unwrap();
        let fetched = store.get_workshop(&created.id).await.unwrap().unwrap();

        assert!(store.delete_workshop(&created.id).await.unwrap());
        assert!(matches!(
            store.save_workshop(fetched).await,
            Err(StoreError::RevisionConflict)
        ));
    }

    #[tokio::test]
    async fn list_orders_by_creation() {
        let store = MemoryStore::new();
        let first = store.insert_workshop(test_workshop("first")).await.unwrap();
        let second = store.insert_workshop(test_workshop("second")).await.unwrap();

        let listed = store.list_workshops().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|w| w.id == first.id));
        assert!(listed.iter().any(|w| w.id == second.id));
    }

    #[tokio::test]
    async fn user_emails_are_unique() {
        let store = MemoryStore::new();
        let alice = store
            .insert_user(User::new("Alice", "alice@example.org", Role::Student))
            .await
            .unwrap();

        assert!(matches!(
            store
                .insert_user(User::new("Impostor", "alice@example.org", Role::Student))
                .await,
            Err(StoreError::Conflict(_))
        ));

        let bob = store
            .insert_user(User::new("Bob", "bob@example.org", Role::Student))
            .await
            .unwrap();

        // Updating Bob onto Alice's address must fail; re-saving Bob's own
        // address must not.
        let mut hijack = bob.clone();
        hijack.email = "alice@example.org".to_string();
        assert!(matches!(
            store.update_user(hijack).await,
            Err(StoreError::Conflict(_))
        ));

        let mut renamed = bob.clone();
        renamed.name = "Robert".to_string();
        let saved = store.update_user(renamed).await.unwrap();
        assert_eq!(saved.name, "Robert");

        let kept = store.get_user(&alice.id).await.unwrap().unwrap();
        assert_eq!(kept.email, "alice@example.org");
    }
}
