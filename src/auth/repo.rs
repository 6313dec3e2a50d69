use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone: Option<String>,
    pub birthday: Option<Date>,
    pub bio: Option<String>,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expiry: Option<OffsetDateTime>,
    pub last_login: Option<OffsetDateTime>,
    pub profile_completion: i32,
    pub created_at: OffsetDateTime,
}

impl User {
    /// Find a user by email (exact match, as stored).
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, phone, birthday, bio,
                   session_token, reset_token, reset_token_expiry,
                   last_login, profile_completion, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, phone, birthday, bio,
                   session_token, reset_token, reset_token_expiry,
                   last_login, profile_completion, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user with hashed password.
    pub async fn create(
        db: &PgPool,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, phone, birthday, bio,
                      session_token, reset_token, reset_token_expiry,
                      last_login, profile_completion, created_at
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Persist a credential as the user's sole active session token.
    pub async fn store_session_token(db: &PgPool, id: i64, token: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET session_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Stamp last_login and replace the session token in one go.
    pub async fn record_login(db: &PgPool, id: i64, token: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET last_login = now(), session_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Forget a session token wherever it is stored. No-op if unknown.
    pub async fn clear_session_token(db: &PgPool, token: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET session_token = NULL WHERE session_token = $1")
            .bind(token)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Identity of whoever holds this session token, if anyone.
    pub async fn find_by_session_token(
        db: &PgPool,
        token: &str,
    ) -> anyhow::Result<Option<(i64, String)>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, email FROM users WHERE session_token = $1",
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Overwrite any prior reset token; only one live reset token per user.
    pub async fn set_reset_token(
        db: &PgPool,
        email: &str,
        token: &str,
        expiry: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET reset_token = $2, reset_token_expiry = $3 WHERE email = $1")
            .bind(email)
            .bind(token)
            .bind(expiry)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn find_by_valid_reset_token(
        db: &PgPool,
        token: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, phone, birthday, bio,
                   session_token, reset_token, reset_token_expiry,
                   last_login, profile_completion, created_at
            FROM users
            WHERE reset_token = $1 AND reset_token_expiry > now()
            "#,
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Complete a password reset: new hash, reset pair cleared, every live
    /// session invalidated.
    pub async fn reset_password(db: &PgPool, id: i64, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2,
                   reset_token = NULL,
                   reset_token_expiry = NULL,
                   session_token = NULL
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Change the password hash, leaving the session token in place.
    pub async fn update_password(db: &PgPool, id: i64, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Merge a partial profile update; absent fields keep their stored value.
    /// Returns the merged row.
    pub async fn update_profile(
        db: &PgPool,
        id: i64,
        name: Option<&str>,
        phone: Option<&str>,
        birthday: Option<Date>,
        bio: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   phone = COALESCE($3, phone),
                   birthday = COALESCE($4, birthday),
                   bio = COALESCE($5, bio)
             WHERE id = $1
            RETURNING id, name, email, password_hash, phone, birthday, bio,
                      session_token, reset_token, reset_token_expiry,
                      last_login, profile_completion, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(phone)
        .bind(birthday)
        .bind(bio)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn set_profile_completion(
        db: &PgPool,
        id: i64,
        completion: i32,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET profile_completion = $2 WHERE id = $1")
            .bind(id)
            .bind(completion)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Registrations of this user on events that have not happened yet.
    pub async fn upcoming_event_count(db: &PgPool, id: i64) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM event_registrations er
            JOIN events e ON er.event_id = e.id
            WHERE er.user_id = $1 AND e.date >= CURRENT_DATE
            "#,
        )
        .bind(id)
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    /// Delete the account in one transaction: give every held seat back to
    /// its event, then remove the user (registrations go with the cascade).
    /// Returns false if the user was already gone.
    pub async fn delete_account(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let mut tx = db.begin().await?;

        sqlx::query(
            r#"
            UPDATE events e
               SET registered = e.registered - 1
              FROM event_registrations er
             WHERE er.event_id = e.id AND er.user_id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            // transaction dropped, nothing committed
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}
