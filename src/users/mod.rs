//! User directory: phone-identity lookup/creation (spec §3 — "a user,
//! identified solely by normalized phone number; no auth").
//!
//! Small enough that the teacher's repos don't have a direct analogue;
//! grounded in the same raw-`sqlx` upsert style as [`crate::catalog`].

use crate::domain::UserId;
use crate::error::AppError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

/// Contract for resolving a normalized phone number to a stable user id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up the user for `phone`, creating one with no display name if
    /// none exists yet.
    async fn get_or_create(&self, phone: &str) -> Result<UserId, AppError>;

    /// The phone number for an existing user id, if one exists.
    async fn phone_for(&self, user_id: UserId) -> Result<Option<String>, AppError>;
}

/// Postgres-backed implementation using an upsert keyed on `phone`.
pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn get_or_create(&self, phone: &str) -> Result<UserId, AppError> {
        let row = sqlx::query(
            "INSERT INTO users (id, phone, display_name)
             VALUES ($1, $2, NULL)
             ON CONFLICT (phone) DO UPDATE SET phone = EXCLUDED.phone
             RETURNING id",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(phone)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;

        Ok(row.try_get::<uuid::Uuid, _>("id").map_err(AppError::from)?.into())
    }

    async fn phone_for(&self, user_id: UserId) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT phone FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        row.map(|r| r.try_get("phone").map_err(AppError::from)).transpose()
    }
}
