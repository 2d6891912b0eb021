use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::FromRow;
use validator::Validate;

use crate::{
    auth::{SessionStore, SESSION_GROUP_ID_KEY},
    cache::keys,
    db::{format_datetime, to_utc},
    domain::{
        membership_active, Membership, MembershipChange, MembershipDetails, NewMembership, Permissions, Realm,
        PENDING_GROUP_ID, VISITOR_GROUP_ID,
    },
    error::{AppError, Result},
    repository::{
        rows::{rows_into, MembershipRow},
        DataContext, MembershipRepository,
    },
};

const MEMBERSHIP_COLUMNS: &str = "groupId, name, description, permissions, price, expirationDays, enable";

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
struct DetailsRow {
    profile_id: i64,
    username: String,
    group_id: i64,
    name: String,
    expiration_days: i64,
    membership_date: Option<NaiveDateTime>,
}

impl From<DetailsRow> for MembershipDetails {
    fn from(row: DetailsRow) -> Self {
        MembershipDetails {
            profile_id: row.profile_id,
            username: row.username,
            group_id: row.group_id,
            membership_name: row.name,
            expiration_days: row.expiration_days,
            membership_date: row.membership_date.map(to_utc),
        }
    }
}

pub struct SqliteMembershipRepository {
    ctx: DataContext,
}

impl SqliteMembershipRepository {
    pub fn new(ctx: DataContext) -> Self {
        Self { ctx }
    }

    fn memberships_table(&self) -> String {
        self.ctx.db.table("Memberships")
    }

    async fn fetch_membership(&self, group_id: i64) -> Result<Option<Membership>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE groupId = ? LIMIT 1",
            MEMBERSHIP_COLUMNS,
            self.memberships_table()
        );
        let row: Option<MembershipRow> = self
            .ctx
            .db
            .run(sqlx::query_as(&sql).bind(group_id).fetch_optional(self.ctx.db.pool()))
            .await?;
        row.map(Membership::try_from).transpose()
    }

    fn group_not_found(group_id: i64) -> AppError {
        AppError::NotFound(format!("Membership group {} not found", group_id))
    }

    /// Drops every cached view of a group, including the details of its members.
    async fn forget_group(&self, group_id: i64) {
        let cache = &self.ctx.cache;
        cache.clear(&keys::memberships(None)).await;
        cache.clear(&keys::memberships(Some(group_id))).await;
        cache.clear(&keys::permissions(group_id)).await;

        let sql = format!("SELECT profileId FROM {} WHERE groupId = ?", self.ctx.table(Realm::Members));
        match self
            .ctx
            .db
            .run(sqlx::query_scalar::<_, i64>(&sql).bind(group_id).fetch_all(self.ctx.db.pool()))
            .await
        {
            Ok(profile_ids) => {
                for profile_id in profile_ids {
                    cache
                        .clear(&keys::member(Realm::Members, profile_id, "membershipDetails"))
                        .await;
                }
            }
            Err(e) => tracing::warn!("Could not list members of group {}: {}", group_id, e),
        }
    }
}

#[async_trait]
impl MembershipRepository for SqliteMembershipRepository {
    /// Permissions of the session's group. Sessions without a group become visitors.
    async fn check_group(&self, session: &dyn SessionStore) -> Result<Permissions> {
        let group_id = match session.get(SESSION_GROUP_ID_KEY).and_then(|g| g.parse::<i64>().ok()) {
            Some(group_id) => group_id,
            None => {
                session.regenerate_id();
                session.set(SESSION_GROUP_ID_KEY, &VISITOR_GROUP_ID.to_string());
                VISITOR_GROUP_ID
            }
        };

        let permissions: Option<Permissions> = self
            .ctx
            .cache
            .remember(&keys::permissions(group_id), || async {
                let sql = format!(
                    "SELECT permissions FROM {} WHERE groupId = ? LIMIT 1",
                    self.memberships_table()
                );
                let blob: Option<String> = self
                    .ctx
                    .db
                    .run(sqlx::query_scalar(&sql).bind(group_id).fetch_optional(self.ctx.db.pool()))
                    .await?;
                blob.map(|blob| Permissions::from_blob(&blob)).transpose()
            })
            .await?;

        permissions.ok_or_else(|| AppError::NotFound(format!("Membership group {} not found", group_id)))
    }

    async fn get_memberships(&self) -> Result<Vec<Membership>> {
        self.ctx
            .cache
            .remember(&keys::memberships(None), || async {
                let sql = format!(
                    "SELECT {} FROM {} ORDER BY enable DESC, name ASC",
                    MEMBERSHIP_COLUMNS,
                    self.memberships_table()
                );
                let rows: Vec<MembershipRow> = self
                    .ctx
                    .db
                    .run(sqlx::query_as(&sql).fetch_all(self.ctx.db.pool()))
                    .await?;
                rows_into(rows)
            })
            .await
    }

    async fn get_membership(&self, group_id: i64) -> Result<Membership> {
        let membership: Option<Membership> = self
            .ctx
            .cache
            .remember(&keys::memberships(Some(group_id)), || self.fetch_membership(group_id))
            .await?;

        membership.ok_or_else(|| AppError::NotFound(format!("Membership group {} not found", group_id)))
    }

    async fn add_membership(&self, membership: NewMembership) -> Result<i64> {
        membership.validate()?;
        let name = membership.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument("Membership name must not be blank".to_string()));
        }

        let sql = format!(
            "INSERT INTO {} (name, description, permissions, price, expirationDays, enable) \
             VALUES (?, ?, ?, ?, ?, ?)",
            self.memberships_table()
        );
        let result = self
            .ctx
            .db
            .run(
                sqlx::query(&sql)
                    .bind(name)
                    .bind(membership.description.trim())
                    .bind(membership.permissions.to_blob()?)
                    .bind(membership.price)
                    .bind(membership.expiration_days)
                    .bind(membership.enable)
                    .execute(self.ctx.db.pool()),
            )
            .await?;
        let group_id = result.last_insert_rowid();

        self.ctx.cache.clear(&keys::memberships(None)).await;
        tracing::info!("Membership group {} ({}) created", group_id, name);
        Ok(group_id)
    }

    async fn update_membership_group(&self, group_id: i64, change: MembershipChange) -> Result<()> {
        let invalid = |reason: &str| Err(AppError::InvalidArgument(format!("{}: {}", change.column(), reason)));
        match &change {
            MembershipChange::Name(name) if name.trim().is_empty() => return invalid("must not be empty"),
            MembershipChange::Price(price) if !(price.is_finite() && *price >= 0.0) => {
                return invalid("expected a non-negative amount")
            }
            MembershipChange::ExpirationDays(days) if *days < 0 => return invalid("expected 0 or more days"),
            _ => {}
        }

        let sql = format!("UPDATE {} SET {} = ? WHERE groupId = ?", self.memberships_table(), change.column());
        let query = sqlx::query(&sql);
        let query = match &change {
            MembershipChange::Name(text) | MembershipChange::Description(text) => query.bind(text.trim().to_string()),
            MembershipChange::Permissions(permissions) => query.bind(permissions.to_blob()?),
            MembershipChange::Price(price) => query.bind(*price),
            MembershipChange::ExpirationDays(days) => query.bind(*days),
            MembershipChange::Enable(enable) => query.bind(*enable),
        };
        let result = self
            .ctx
            .db
            .run(query.bind(group_id).execute(self.ctx.db.pool()))
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::group_not_found(group_id));
        }

        self.forget_group(group_id).await;
        tracing::info!("{} of membership group {} updated", change.column(), group_id);
        Ok(())
    }

    /// Built-in and default groups stay, as does any group members still belong to.
    async fn delete_membership(&self, group_id: i64) -> Result<()> {
        if group_id == VISITOR_GROUP_ID || group_id == PENDING_GROUP_ID {
            return Err(AppError::Forbidden(format!("Membership group {} is built in", group_id)));
        }
        let settings = self.ctx.settings.system_settings().await?;
        if group_id == settings.default_membership_group_id {
            return Err(AppError::Forbidden(format!(
                "Membership group {} is the default for new members",
                group_id
            )));
        }

        let sql = format!("SELECT COUNT(*) FROM {} WHERE groupId = ?", self.ctx.table(Realm::Members));
        let members: i64 = self
            .ctx
            .db
            .run(sqlx::query_scalar(&sql).bind(group_id).fetch_one(self.ctx.db.pool()))
            .await?;
        if members > 0 {
            tracing::warn!("Refused to delete membership group {} with {} members", group_id, members);
            return Err(AppError::Conflict(format!(
                "Membership group {} still has {} members",
                group_id, members
            )));
        }

        let sql = format!("DELETE FROM {} WHERE groupId = ?", self.memberships_table());
        let result = self
            .ctx
            .db
            .run(sqlx::query(&sql).bind(group_id).execute(self.ctx.db.pool()))
            .await?;
        if result.rows_affected() == 0 {
            return Err(Self::group_not_found(group_id));
        }

        self.forget_group(group_id).await;
        tracing::info!("Membership group {} deleted", group_id);
        Ok(())
    }

    async fn get_membership_details(&self, profile_id: i64) -> Result<MembershipDetails> {
        let key = keys::member(Realm::Members, profile_id, "membershipDetails");
        let details: Option<MembershipDetails> = self
            .ctx
            .cache
            .remember(&key, || async {
                let sql = format!(
                    "SELECT m.profileId, m.username, m.groupId, g.name, g.expirationDays, m.membershipDate \
                     FROM {} m INNER JOIN {} g ON g.groupId = m.groupId WHERE m.profileId = ? LIMIT 1",
                    self.ctx.table(Realm::Members),
                    self.memberships_table()
                );
                let row: Option<DetailsRow> = self
                    .ctx
                    .db
                    .run(sqlx::query_as(&sql).bind(profile_id).fetch_optional(self.ctx.db.pool()))
                    .await?;
                Ok::<_, AppError>(row.map(MembershipDetails::from))
            })
            .await?;

        details.ok_or_else(|| AppError::NotFound(format!("No membership for member {}", profile_id)))
    }

    async fn check_membership_expiration(&self, profile_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let sql = format!(
            "SELECT m.membershipDate, g.expirationDays FROM {} m \
             INNER JOIN {} g ON g.groupId = m.groupId WHERE m.profileId = ? LIMIT 1",
            self.ctx.table(Realm::Members),
            self.memberships_table()
        );
        let row: Option<(Option<NaiveDateTime>, i64)> = self
            .ctx
            .db
            .run(sqlx::query_as(&sql).bind(profile_id).fetch_optional(self.ctx.db.pool()))
            .await?;

        Ok(match row {
            Some((membership_date, expiration_days)) => {
                membership_active(membership_date.map(to_utc), expiration_days, now)
            }
            None => false,
        })
    }

    async fn update_membership(&self, group_id: i64, profile_id: i64, since: Option<DateTime<Utc>>) -> Result<()> {
        if self.fetch_membership(group_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Membership group {} not found", group_id)));
        }

        let members = self.ctx.table(Realm::Members);
        let result = match since {
            Some(since) => {
                let sql = format!("UPDATE {} SET groupId = ?, membershipDate = ? WHERE profileId = ?", members);
                self.ctx
                    .db
                    .run(
                        sqlx::query(&sql)
                            .bind(group_id)
                            .bind(format_datetime(&since))
                            .bind(profile_id)
                            .execute(self.ctx.db.pool()),
                    )
                    .await?
            }
            None => {
                let sql = format!("UPDATE {} SET groupId = ? WHERE profileId = ?", members);
                self.ctx
                    .db
                    .run(sqlx::query(&sql).bind(group_id).bind(profile_id).execute(self.ctx.db.pool()))
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Member {} not found", profile_id)));
        }

        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        tracing::info!("Member {} moved to membership group {}", profile_id, group_id);
        Ok(())
    }
}
