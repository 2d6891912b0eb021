use async_trait::async_trait;
use sqlx::FromRow;

use crate::{
    auth::check_validation_hash,
    db::format_datetime,
    domain::{ActiveState, HashValidation, Realm},
    error::{AppError, AuthFailure, Result},
    repository::{AuthRepository, DataContext},
};

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
struct HashValidationRow {
    email: String,
    username: String,
    first_name: Option<String>,
    hash_validation: Option<String>,
}

pub struct SqliteAuthRepository {
    ctx: DataContext,
}

impl SqliteAuthRepository {
    pub fn new(ctx: DataContext) -> Self {
        Self { ctx }
    }

    /// Hides which credential was wrong unless the site reveals it.
    async fn reject(&self, failure: AuthFailure) -> Result<()> {
        let settings = self.ctx.settings.system_settings().await?;
        let failure = if settings.reveal_login_failure_reason {
            failure
        } else {
            AuthFailure::InvalidCredentials
        };
        Err(AppError::AuthRejected(failure))
    }
}

#[async_trait]
impl AuthRepository for SqliteAuthRepository {
    async fn login(&self, email: &str, password: &str, realm: Realm) -> Result<()> {
        let sql = format!(
            "SELECT password FROM {} WHERE LOWER(email) = LOWER(?) LIMIT 1",
            self.ctx.table(realm)
        );
        let stored: Option<String> = self
            .ctx
            .db
            .run(sqlx::query_scalar(&sql).bind(email).fetch_optional(self.ctx.db.pool()))
            .await?;

        let Some(stored) = stored else {
            tracing::debug!("Login attempt for unknown email in {}", realm);
            return self.reject(AuthFailure::EmailDoesNotExist).await;
        };

        if !self.ctx.hasher.verify(password, &stored)? {
            tracing::debug!("Login attempt with wrong password in {}", realm);
            return self.reject(AuthFailure::PasswordDoesNotExist).await;
        }

        Ok(())
    }

    async fn session_log(&self, email: &str, username: &str, first_name: Option<&str>, realm: Realm) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (email, username, firstName, ip, dateTime) VALUES (?, ?, ?, ?, ?)",
            self.ctx.db.table(realm.log_table())
        );
        self.ctx
            .db
            .run(
                sqlx::query(&sql)
                    .bind(email)
                    .bind(username)
                    .bind(first_name.unwrap_or_default())
                    .bind(self.ctx.ip.client_ip())
                    .bind(format_datetime(&self.ctx.now()))
                    .execute(self.ctx.db.pool()),
            )
            .await?;
        Ok(())
    }

    async fn change_password(&self, email: &str, new_password: &str, realm: Realm) -> Result<()> {
        if new_password.is_empty() {
            return Err(AppError::InvalidArgument("Password must not be empty".to_string()));
        }
        let hash = self.ctx.hasher.hash(new_password)?;

        let sql = format!(
            "UPDATE {} SET password = ? WHERE LOWER(email) = LOWER(?)",
            self.ctx.table(realm)
        );
        let result = self
            .ctx
            .db
            .run(sqlx::query(&sql).bind(&hash).bind(email).execute(self.ctx.db.pool()))
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("No account with that email in {}", realm)));
        }

        tracing::info!("Password changed for an account in {}", realm);
        Ok(())
    }

    async fn set_new_hash_validation(&self, profile_id: i64, hash: &str, realm: Realm) -> Result<()> {
        check_validation_hash(hash)?;

        let sql = format!(
            "UPDATE {} SET hashValidation = ? WHERE profileId = ?",
            self.ctx.table(realm)
        );
        let result = self
            .ctx
            .db
            .run(sqlx::query(&sql).bind(hash).bind(profile_id).execute(self.ctx.db.pool()))
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} {} not found", realm, profile_id)));
        }

        self.ctx.cache.clear_member(realm, profile_id).await;
        Ok(())
    }

    async fn check_hash_validation(&self, email: &str, hash: &str, realm: Realm) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(profileId) FROM {} WHERE LOWER(email) = LOWER(?) AND hashValidation = ?",
            self.ctx.table(realm)
        );
        let count: i64 = self
            .ctx
            .db
            .run(sqlx::query_scalar(&sql).bind(email).bind(hash).fetch_one(self.ctx.db.pool()))
            .await?;
        Ok(count == 1)
    }

    /// Confirmation data of an account still waiting for email validation.
    async fn get_hash_validation(&self, email: &str, realm: Realm) -> Result<HashValidation> {
        let sql = format!(
            "SELECT email, username, firstName, hashValidation FROM {} \
             WHERE LOWER(email) = LOWER(?) AND active = ? LIMIT 1",
            self.ctx.table(realm)
        );
        let row: Option<HashValidationRow> = self
            .ctx
            .db
            .run(
                sqlx::query_as(&sql)
                    .bind(email)
                    .bind(ActiveState::Pending.as_i64())
                    .fetch_optional(self.ctx.db.pool()),
            )
            .await?;

        row.map(|row| HashValidation {
            email: row.email,
            username: row.username,
            first_name: row.first_name,
            hash_validation: row.hash_validation,
        })
        .ok_or_else(|| AppError::NotFound(format!("No pending account with that email in {}", realm)))
    }

    /// Moves a pending account to active. Returns false when nothing transitioned.
    async fn validate_account(&self, email: &str, hash: &str, realm: Realm) -> Result<bool> {
        let table = self.ctx.table(realm);
        let result = self
            .ctx
            .db
            .run(
                sqlx::query(&format!(
                    "UPDATE {} SET active = ? WHERE LOWER(email) = LOWER(?) AND hashValidation = ? AND active = ?",
                    table
                ))
                .bind(ActiveState::Active.as_i64())
                .bind(email)
                .bind(hash)
                .bind(ActiveState::Pending.as_i64())
                .execute(self.ctx.db.pool()),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let profile_id: Option<i64> = self
            .ctx
            .db
            .run(
                sqlx::query_scalar(&format!("SELECT profileId FROM {} WHERE LOWER(email) = LOWER(?) LIMIT 1", table))
                    .bind(email)
                    .fetch_optional(self.ctx.db.pool()),
            )
            .await?;
        if let Some(profile_id) = profile_id {
            self.ctx.cache.clear_member(realm, profile_id).await;
            tracing::info!("{} {} validated", realm, profile_id);
        }

        Ok(true)
    }
}
