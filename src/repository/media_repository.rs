use async_trait::async_trait;
use sqlx::FromRow;

use crate::{
    cache::keys,
    domain::{Avatar, Background, Realm},
    error::{AppError, Result},
    repository::{DataContext, MediaRepository},
};

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
struct AvatarRow {
    profile_id: i64,
    avatar: Option<String>,
    approved_avatar: i64,
}

#[derive(FromRow)]
struct BackgroundRow {
    file: String,
    approved: i64,
}

/// Avatar and profile background attributes of members.
pub struct SqliteMediaRepository {
    ctx: DataContext,
}

impl SqliteMediaRepository {
    pub fn new(ctx: DataContext) -> Self {
        Self { ctx }
    }

    /// Each approval filter is cached separately.
    fn media_key(profile_id: i64, name: &str, approved: Option<bool>) -> String {
        let filter = match approved {
            Some(true) => "1",
            Some(false) => "0",
            None => "any",
        };
        keys::member(Realm::Members, profile_id, &format!("{}/{}", name, filter))
    }
}

#[async_trait]
impl MediaRepository for SqliteMediaRepository {
    async fn set_avatar(&self, profile_id: i64, path: Option<&str>, approved: bool) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET avatar = ?, approvedAvatar = ? WHERE profileId = ?",
            self.ctx.table(Realm::Members)
        );
        let result = self
            .ctx
            .db
            .run(
                sqlx::query(&sql)
                    .bind(path)
                    .bind(approved)
                    .bind(profile_id)
                    .execute(self.ctx.db.pool()),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Member {} not found", profile_id)));
        }

        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        Ok(())
    }

    async fn delete_avatar(&self, profile_id: i64) -> Result<()> {
        self.set_avatar(profile_id, None, true).await
    }

    async fn get_avatar(&self, profile_id: i64, approved: Option<bool>) -> Result<Avatar> {
        let key = Self::media_key(profile_id, "avatar", approved);
        let avatar: Option<Avatar> = self
            .ctx
            .cache
            .remember(&key, || async {
                let mut sql = format!(
                    "SELECT profileId, avatar, approvedAvatar FROM {} WHERE profileId = ?",
                    self.ctx.table(Realm::Members)
                );
                if approved.is_some() {
                    sql.push_str(" AND approvedAvatar = ?");
                }
                sql.push_str(" LIMIT 1");

                let mut query = sqlx::query_as::<_, AvatarRow>(&sql).bind(profile_id);
                if let Some(approved) = approved {
                    query = query.bind(approved);
                }
                let row = self.ctx.db.run(query.fetch_optional(self.ctx.db.pool())).await?;

                Ok::<_, AppError>(row.map(|row| Avatar {
                    profile_id: row.profile_id,
                    pic: row.avatar,
                    approved: row.approved_avatar != 0,
                }))
            })
            .await?;

        avatar.ok_or_else(|| AppError::NotFound(format!("No matching avatar for member {}", profile_id)))
    }

    async fn get_background(&self, profile_id: i64, approved: Option<bool>) -> Result<Option<Background>> {
        let key = Self::media_key(profile_id, "background", approved);
        self.ctx
            .cache
            .remember(&key, || async {
                let mut sql = format!(
                    "SELECT file, approved FROM {} WHERE profileId = ?",
                    self.ctx.db.table("MembersBackground")
                );
                if approved.is_some() {
                    sql.push_str(" AND approved = ?");
                }
                sql.push_str(" LIMIT 1");

                let mut query = sqlx::query_as::<_, BackgroundRow>(&sql).bind(profile_id);
                if let Some(approved) = approved {
                    query = query.bind(approved);
                }
                let row = self.ctx.db.run(query.fetch_optional(self.ctx.db.pool())).await?;

                Ok::<_, AppError>(row.map(|row| Background {
                    file: row.file,
                    approved: row.approved != 0,
                }))
            })
            .await
    }

    async fn add_background(&self, profile_id: i64, file: &str, approved: bool) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (profileId, file, approved) VALUES (?, ?, ?)",
            self.ctx.db.table("MembersBackground")
        );
        self.ctx
            .db
            .run(
                sqlx::query(&sql)
                    .bind(profile_id)
                    .bind(file)
                    .bind(approved)
                    .execute(self.ctx.db.pool()),
            )
            .await?;

        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        Ok(())
    }

    async fn delete_background(&self, profile_id: i64) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE profileId = ?",
            self.ctx.db.table("MembersBackground")
        );
        self.ctx
            .db
            .run(sqlx::query(&sql).bind(profile_id).execute(self.ctx.db.pool()))
            .await?;

        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        Ok(())
    }
}
