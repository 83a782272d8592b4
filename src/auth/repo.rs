use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{RefreshSession, User};

/// True when the database rejected a write for violating a unique
/// constraint (duplicate email or token string).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

impl User {
    /// Find a user by email. Case-sensitive exact match on the stored key.
    pub async fn find_by_email(db: &PgPool, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_active, role, first_name, last_name, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_active, role, first_name, last_name, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Create a new user with hashed password. New accounts start active
    /// with the "user" role.
    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, is_active, role, first_name, last_name, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(first_name)
        .bind(last_name)
        .fetch_one(db)
        .await
    }
}

impl RefreshSession {
    pub async fn insert(
        db: &PgPool,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> sqlx::Result<RefreshSession> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            INSERT INTO refresh_tokens (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, token, expires_at, revoked, created_at
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(db)
        .await
    }

    /// A session is live when it matches the exact token string and owner,
    /// is not revoked, and has not passed its expiry. Expiry is enforced
    /// here by comparison, not by background eviction.
    pub async fn find_active(
        db: &PgPool,
        token: &str,
        user_id: Uuid,
    ) -> sqlx::Result<Option<RefreshSession>> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT id, user_id, token, expires_at, revoked, created_at
            FROM refresh_tokens
            WHERE token = $1 AND user_id = $2 AND revoked = FALSE AND expires_at > now()
            "#,
        )
        .bind(token)
        .bind(user_id)
        .fetch_optional(db)
        .await
    }

    /// Revoke the session owned by `user_id` matching `token`. Returns the
    /// number of rows touched; an unknown or already-revoked token touches
    /// zero rows and is not an error.
    pub async fn revoke(db: &PgPool, token: &str, user_id: Uuid) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE
            WHERE token = $1 AND user_id = $2 AND revoked = FALSE
            "#,
        )
        .bind(token)
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every active session for a user in one statement.
    pub async fn revoke_all_for_user(db: &PgPool, user_id: Uuid) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE
            WHERE user_id = $1 AND revoked = FALSE
            "#,
        )
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }
}
