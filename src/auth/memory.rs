use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{
    repo::{CredentialStore, StoreError, StoreResult},
    repo_types::{NewUser, Role, User},
};

/// Process-local store. Each mutation runs under one write lock, which gives
/// the same per-record atomicity as a single `UPDATE`.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record including inactive ones.
    pub async fn get_raw(&self, id: Uuid) -> Option<User> {
        self.users.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).filter(|u| u.active).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.active && u.email == email)
            .cloned())
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.active && u.password_reset_token.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;
        // Uniqueness spans inactive records too, like the table constraint.
        if users.values().any(|u| u.email == new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            photo: new.photo,
            role: Role::User,
            password_hash: new.password_hash,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()> {
        if let Some(u) = self.users.write().await.get_mut(&id).filter(|u| u.active) {
            u.password_reset_token = Some(token_hash.to_string());
            u.password_reset_expires = Some(expires_at);
        }
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let pending = users
            .get_mut(&id)
            .filter(|u| u.password_reset_token.as_deref() == Some(token_hash));
        if let Some(u) = pending {
            u.password_reset_token = None;
            u.password_reset_expires = None;
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        let Some(u) = users.get_mut(&id) else {
            return Ok(None);
        };
        let live = u.active
            && u.password_reset_token.as_deref() == Some(token_hash)
            && u.password_reset_expires.is_some_and(|exp| exp > now);
        if !live {
            return Ok(None);
        }
        u.password_hash = new_password_hash.to_string();
        u.password_changed_at = Some(changed_at);
        u.password_reset_token = None;
        u.password_reset_expires = None;
        Ok(Some(u.clone()))
    }

    async fn update_password(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        let current = users
            .get_mut(&id)
            .filter(|u| u.active && u.password_hash == expected_hash);
        let Some(u) = current else {
            return Ok(None);
        };
        u.password_hash = new_password_hash.to_string();
        u.password_changed_at = Some(changed_at);
        u.password_reset_token = None;
        u.password_reset_expires = None;
        Ok(Some(u.clone()))
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        let Some(u) = users.get_mut(&id).filter(|u| u.active) else {
            return Ok(None);
        };
        u.role = role;
        Ok(Some(u.clone()))
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&id).filter(|u| u.active) {
            Some(u) => {
                u.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Test".into(),
            email: email.into(),
            photo: None,
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let store = InMemoryCredentialStore::new();
        store.create(new_user("a@example.com")).await.unwrap();
        let err = store.create(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn inactive_records_are_invisible() {
        let store = InMemoryCredentialStore::new();
        let u = store.create(new_user("a@example.com")).await.unwrap();
        store.set_reset_token(u.id, "h", OffsetDateTime::now_utc() + Duration::minutes(5))
            .await
            .unwrap();
        assert!(store.deactivate(u.id).await.unwrap());
        assert!(!store.deactivate(u.id).await.unwrap());

        assert!(store.find_by_id(u.id).await.unwrap().is_none());
        assert!(store.find_by_email("a@example.com").await.unwrap().is_none());
        assert!(store.find_by_reset_token("h").await.unwrap().is_none());
        assert!(store.set_role(u.id, Role::Admin).await.unwrap().is_none());
        assert!(store.get_raw(u.id).await.is_some());
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let store = InMemoryCredentialStore::new();
        let u = store.create(new_user("a@example.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store.set_reset_token(u.id, "h", now + Duration::minutes(10)).await.unwrap();

        let first = store.consume_reset_token(u.id, "h", now, "new", now).await.unwrap();
        let first = first.expect("first consume succeeds");
        assert_eq!(first.password_hash, "new");
        assert!(!first.has_pending_reset());
        assert_eq!(first.password_changed_at, Some(now));

        let second = store.consume_reset_token(u.id, "h", now, "newer", now).await.unwrap();
        assert!(second.is_none());
        assert_eq!(store.get_raw(u.id).await.unwrap().password_hash, "new");
    }

    #[tokio::test]
    async fn consume_refuses_expired_or_replaced_token() {
        let store = InMemoryCredentialStore::new();
        let u = store.create(new_user("a@example.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store.set_reset_token(u.id, "old", now + Duration::minutes(10)).await.unwrap();
        store.set_reset_token(u.id, "new", now + Duration::minutes(10)).await.unwrap();

        assert!(store.consume_reset_token(u.id, "old", now, "x", now).await.unwrap().is_none());
        let later = now + Duration::minutes(11);
        assert!(store.consume_reset_token(u.id, "new", later, "x", later).await.unwrap().is_none());
        assert_eq!(store.get_raw(u.id).await.unwrap().password_hash, "hash");
    }

    #[tokio::test]
    async fn clear_reset_token_clears_both_fields() {
        let store = InMemoryCredentialStore::new();
        let u = store.create(new_user("a@example.com")).await.unwrap();
        store.set_reset_token(u.id, "h", OffsetDateTime::now_utc()).await.unwrap();
        assert!(store.get_raw(u.id).await.unwrap().has_pending_reset());
        store.clear_reset_token(u.id, "h").await.unwrap();
        let raw = store.get_raw(u.id).await.unwrap();
        assert!(raw.password_reset_token.is_none());
        assert!(raw.password_reset_expires.is_none());
    }

    #[tokio::test]
    async fn clear_reset_token_keeps_a_newer_token() {
        let store = InMemoryCredentialStore::new();
        let u = store.create(new_user("a@example.com")).await.unwrap();
        let expires = OffsetDateTime::now_utc() + Duration::minutes(10);
        store.set_reset_token(u.id, "first", expires).await.unwrap();
        store.set_reset_token(u.id, "second", expires).await.unwrap();

        store.clear_reset_token(u.id, "first").await.unwrap();
        let raw = store.get_raw(u.id).await.unwrap();
        assert_eq!(raw.password_reset_token.as_deref(), Some("second"));
        assert_eq!(raw.password_reset_expires, Some(expires));
    }

    #[tokio::test]
    async fn update_password_requires_the_verified_hash() {
        let store = InMemoryCredentialStore::new();
        let u = store.create(new_user("a@example.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();

        let stale = store.update_password(u.id, "not-current", "x", now).await.unwrap();
        assert!(stale.is_none());
        assert_eq!(store.get_raw(u.id).await.unwrap().password_hash, "hash");

        let updated = store.update_password(u.id, "hash", "new", now).await.unwrap();
        assert_eq!(updated.expect("matching hash").password_hash, "new");
        assert!(store.update_password(u.id, "hash", "again", now).await.unwrap().is_none());
    }
}
