use async_trait::async_trait;
use chrono::Duration;

use crate::{
    cache::keys,
    db::format_datetime,
    domain::{Realm, UserStatus},
    error::{AppError, Result},
    repository::{rows::parse_user_status, DataContext, PresenceRepository},
};

pub struct SqlitePresenceRepository {
    ctx: DataContext,
}

impl SqlitePresenceRepository {
    pub fn new(ctx: DataContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PresenceRepository for SqlitePresenceRepository {
    /// Online means status online and active within the last `minutes`.
    async fn is_online(&self, profile_id: i64, minutes: i64) -> Result<bool> {
        let Some(since) = Duration::try_minutes(minutes).and_then(|window| self.ctx.now().checked_sub_signed(window))
        else {
            tracing::debug!("Presence window of {} minutes is out of range", minutes);
            return Ok(false);
        };
        let since = format_datetime(&since);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE profileId = ? AND userStatus = ? AND lastActivity >= ?",
            self.ctx.table(Realm::Members)
        );
        let count: i64 = self
            .ctx
            .db
            .run(
                sqlx::query_scalar(&sql)
                    .bind(profile_id)
                    .bind(UserStatus::Online.as_i64())
                    .bind(&since)
                    .fetch_one(self.ctx.db.pool()),
            )
            .await?;

        Ok(count == 1)
    }

    async fn set_user_status(&self, profile_id: i64, status: UserStatus) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET userStatus = ? WHERE profileId = ?",
            self.ctx.table(Realm::Members)
        );
        let result = self
            .ctx
            .db
            .run(
                sqlx::query(&sql)
                    .bind(status.as_i64())
                    .bind(profile_id)
                    .execute(self.ctx.db.pool()),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Member {} not found", profile_id)));
        }

        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        tracing::debug!("member {} is now {:?}", profile_id, status);
        Ok(())
    }

    async fn get_user_status(&self, profile_id: i64) -> Result<UserStatus> {
        let key = keys::member(Realm::Members, profile_id, "presence/userStatus");
        let status: i64 = self
            .ctx
            .cache
            .remember(&key, || async {
                let sql = format!(
                    "SELECT userStatus FROM {} WHERE profileId = ? LIMIT 1",
                    self.ctx.table(Realm::Members)
                );
                let status: Option<i64> = self
                    .ctx
                    .db
                    .run(sqlx::query_scalar(&sql).bind(profile_id).fetch_optional(self.ctx.db.pool()))
                    .await?;
                status.ok_or_else(|| AppError::NotFound(format!("Member {} not found", profile_id)))
            })
            .await?;

        parse_user_status(status)
    }
}
