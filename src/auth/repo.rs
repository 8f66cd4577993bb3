use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, Role, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of identity records.
///
/// Every lookup skips inactive records. Every mutation touches one record in a
/// single atomic write, so concurrent requests on the same identity serialize
/// at the store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// `email` must already be normalized to lower-case.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<User>>;

    async fn create(&self, user: NewUser) -> StoreResult<User>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()>;

    /// Clears the pending reset only while it is still `token_hash`, so a newer
    /// token issued by a concurrent request survives.
    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> StoreResult<()>;

    /// Writes the new password and clears the reset fields, but only while the
    /// stored token still equals `token_hash` and is unexpired at `now`.
    /// Returns `None` if another request consumed or replaced it first.
    async fn consume_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>>;

    /// Writes the new password and clears any pending reset, but only while the
    /// stored digest still equals `expected_hash` (the one the caller verified).
    /// Returns `None` if the password changed in between.
    async fn update_password(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>>;

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>>;

    /// Returns `false` if no active record matched.
    async fn deactivate(&self, id: Uuid) -> StoreResult<bool>;
}

const USER_COLUMNS: &str = "id, name, email, photo, role, password_hash, password_changed_at, \
     password_reset_token, password_reset_expires, active, created_at";

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND active"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE password_reset_token = $1 AND active"
        ))
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, photo, role, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.photo)
        .bind(Role::User.as_str())
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = $2, password_reset_expires = $3
            WHERE id = $1 AND active
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = NULL, password_reset_expires = NULL
            WHERE id = $1 AND password_reset_token = $2
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .execute(&self.db)
        .await?;
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
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $4,
                password_changed_at = $5,
                password_reset_token = NULL,
                password_reset_expires = NULL
            WHERE id = $1
              AND active
              AND password_reset_token = $2
              AND password_reset_expires > $3
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(token_hash)
        .bind(now)
        .bind(new_password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_password(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_changed_at = $3,
                password_reset_token = NULL,
                password_reset_expires = NULL
            WHERE id = $1 AND active AND password_hash = $4
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_password_hash)
        .bind(changed_at)
        .bind(expected_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 AND active RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
