use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{FromRow, SqliteConnection};
use validator::{Validate, ValidateEmail};

use crate::{
    auth::check_validation_hash,
    cache::keys,
    db::{format_date, format_datetime},
    domain::*,
    error::{AppError, Result},
    repository::{
        rows::{parse_sex, InfoRow, MemberRow, PrivacyRow, MEMBER_COLUMNS},
        DataContext, MemberRepository,
    },
};

/// Rows referencing a member by id, purged before the member's own rows.
const DEPENDENT_ROWS: &[(&str, &str)] = &[
    ("Messages", "sender"),
    ("Messages", "recipient"),
    ("CommentsProfile", "sender"),
    ("CommentsProfile", "recipient"),
    ("CommentsPicture", "sender"),
    ("CommentsPicture", "recipient"),
    ("CommentsVideo", "sender"),
    ("CommentsVideo", "recipient"),
    ("CommentsNote", "sender"),
    ("CommentsNote", "recipient"),
    ("CommentsBlog", "sender"),
    ("CommentsGame", "sender"),
    ("Pictures", "profileId"),
    ("AlbumsPictures", "profileId"),
    ("Videos", "profileId"),
    ("AlbumsVideos", "profileId"),
    ("MembersFriends", "profileId"),
    ("MembersFriends", "friendId"),
    ("MembersWall", "profileId"),
    ("MembersBackground", "profileId"),
    ("NotesCategories", "profileId"),
    ("Notes", "profileId"),
    ("MembersWhoViews", "profileId"),
    ("MembersWhoViews", "visitorId"),
    ("Report", "spammerId"),
];

/// One-to-one rows, then the member itself. Forum tables are left alone.
const OWNED_ROWS: &[&str] = &["MembersNotifications", "MembersPrivacy", "MembersInfo", "Members"];

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
struct NotificationRow {
    enable_newsletters: i64,
    new_msg: i64,
    friend_request: i64,
}

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
struct UsernameRow {
    profile_id: i64,
    username: String,
    sex: String,
}

/// Lookup keys that live outside the member's prefix.
struct Identity {
    email: String,
    username: String,
}

pub struct SqliteMemberRepository {
    ctx: DataContext,
}

impl SqliteMemberRepository {
    pub fn new(ctx: DataContext) -> Self {
        Self { ctx }
    }

    fn not_found(realm: Realm, profile_id: i64) -> AppError {
        AppError::NotFound(format!("{} profile {} not found", realm, profile_id))
    }

    async fn fetch_member(&self, profile_id: i64, realm: Realm) -> Result<Option<Member>> {
        let sql = format!(
            "SELECT {} FROM {} AS m WHERE m.profileId = ? LIMIT 1",
            MEMBER_COLUMNS,
            self.ctx.table(realm)
        );
        let row = self
            .ctx
            .db
            .run(
                sqlx::query_as::<_, MemberRow>(&sql)
                    .bind(profile_id)
                    .fetch_optional(self.ctx.db.pool()),
            )
            .await?;

        row.map(Member::try_from).transpose()
    }

    async fn fetch_field(&self, profile_id: i64, field: MemberField, realm: Realm) -> Result<FieldValue> {
        let db = &self.ctx.db;

        if field == MemberField::Background {
            let sql = format!(
                "SELECT file FROM {} WHERE profileId = ? LIMIT 1",
                db.table("MembersBackground")
            );
            let file: Option<String> = db
                .run(sqlx::query_scalar(&sql).bind(profile_id).fetch_optional(db.pool()))
                .await?;
            return Ok(file.into());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE profileId = ? LIMIT 1",
            field.column(),
            self.ctx.table(realm)
        );

        if field.is_integer() {
            let value: Option<i64> = db
                .run(sqlx::query_scalar(&sql).bind(profile_id).fetch_optional(db.pool()))
                .await?;
            value.map(FieldValue::Int).ok_or_else(|| Self::not_found(realm, profile_id))
        } else {
            let value: Option<Option<String>> = db
                .run(sqlx::query_scalar(&sql).bind(profile_id).fetch_optional(db.pool()))
                .await?;
            value.map(FieldValue::from).ok_or_else(|| Self::not_found(realm, profile_id))
        }
    }

    async fn text_field(&self, profile_id: i64, field: MemberField, realm: Realm) -> Result<Option<String>> {
        match self.get_field(profile_id, field, realm).await? {
            FieldValue::Text(value) => Ok(Some(value)),
            FieldValue::Null => Ok(None),
            FieldValue::Int(value) => Ok(Some(value.to_string())),
        }
    }

    async fn required_text(&self, profile_id: i64, field: MemberField, realm: Realm) -> Result<String> {
        self.text_field(profile_id, field, realm).await?.ok_or_else(|| {
            AppError::Database(format!("{} of profile {} is null", field.column(), profile_id))
        })
    }

    async fn fetch_identity(&self, profile_id: i64, realm: Realm) -> Result<Identity> {
        let sql = format!(
            "SELECT email, username FROM {} WHERE profileId = ? LIMIT 1",
            self.ctx.table(realm)
        );
        let row: Option<(String, String)> = self
            .ctx
            .db
            .run(sqlx::query_as(&sql).bind(profile_id).fetch_optional(self.ctx.db.pool()))
            .await?;

        row.map(|(email, username)| Identity { email, username })
            .ok_or_else(|| Self::not_found(realm, profile_id))
    }

    /// Drops every cached value derived from one member's rows.
    async fn forget(&self, realm: Realm, profile_id: i64, identity: &Identity) {
        let cache = &self.ctx.cache;
        cache.clear_member(realm, profile_id).await;
        cache.clear(&keys::id_by_email(realm, &identity.email)).await;
        cache.clear(&keys::id_by_username(realm, &identity.username)).await;
        cache.clear(&keys::sex_by_username(realm, &identity.username)).await;
    }

    /// Writes one column of an existing row and invalidates the member's entries.
    async fn touch(&self, realm: Realm, profile_id: i64, column: &str, value: FieldValue) -> Result<()> {
        let sql = format!("UPDATE {} SET {} = ? WHERE profileId = ?", self.ctx.table(realm), column);
        let query = sqlx::query(&sql);
        let query = match value {
            FieldValue::Int(v) => query.bind(v),
            FieldValue::Text(v) => query.bind(v),
            FieldValue::Null => query.bind(Option::<String>::None),
        };
        let result = self
            .ctx
            .db
            .run(query.bind(profile_id).execute(self.ctx.db.pool()))
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(realm, profile_id));
        }

        self.ctx.cache.clear_member(realm, profile_id).await;
        Ok(())
    }

    fn check_field_value(&self, field: MemberField, value: &FieldValue) -> Result<()> {
        let invalid = |reason: &str| Err(AppError::InvalidArgument(format!("{}: {}", field.column(), reason)));

        if field == MemberField::Background {
            return invalid("backgrounds are managed by the media repository");
        }

        if field.is_integer() {
            let Some(number) = value.as_int() else {
                return invalid("expected an integer");
            };
            return match field {
                MemberField::UserStatus if UserStatus::from_i64(number).is_none() => invalid("unknown status"),
                MemberField::Ban if !(0..=1).contains(&number) => invalid("expected 0 or 1"),
                _ => Ok(()),
            };
        }

        let text = match value {
            FieldValue::Text(text) => Some(text.trim()),
            FieldValue::Null => None,
            FieldValue::Int(_) => return invalid("expected text"),
        };

        match (field, text) {
            (MemberField::FirstName | MemberField::LastName | MemberField::Avatar, _) => Ok(()),
            (MemberField::BirthDate, None) => Ok(()),
            (MemberField::BirthDate, Some(date)) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map(|_| ())
                .or_else(|_| invalid("expected YYYY-MM-DD")),
            (_, None) | (_, Some("")) => invalid("must not be empty"),
            (MemberField::Email, Some(email)) if !email.validate_email() => invalid("not an email address"),
            (MemberField::Username, Some(username)) if self.ctx.site.is_ghost(username) => {
                invalid("reserved username")
            }
            (MemberField::Sex, Some(sex)) if Sex::from_str(sex).is_none() => invalid("unknown sex"),
            _ => Ok(()),
        }
    }

    /// A member may only point at a group that exists in Memberships.
    async fn ensure_group_exists(&self, group_id: i64) -> Result<()> {
        let db = &self.ctx.db;
        let found: i64 = db
            .run(
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {} WHERE groupId = ?",
                    db.table("Memberships")
                ))
                .bind(group_id)
                .fetch_one(db.pool()),
            )
            .await?;

        if found == 0 {
            tracing::warn!("Refused to assign unknown membership group {}", group_id);
            return Err(AppError::NotFound(format!("Membership group {} not found", group_id)));
        }
        Ok(())
    }

    async fn insert_member(
        &self,
        conn: &mut SqliteConnection,
        member: &NewMember,
        password_hash: &str,
        group_id: i64,
    ) -> Result<i64> {
        let db = &self.ctx.db;

        let group_exists: i64 = db
            .run(
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {} WHERE groupId = ?",
                    db.table("Memberships")
                ))
                .bind(group_id)
                .fetch_one(&mut *conn),
            )
            .await?;
        if group_exists == 0 {
            return Err(AppError::InvalidArgument(format!(
                "Default membership group {} does not exist",
                group_id
            )));
        }

        let now = self.ctx.clock.timestamp();
        let active = member.active.unwrap_or(ActiveState::Active);

        let result = db
            .run(
                sqlx::query(&format!(
                    r#"
                    INSERT INTO {} (
                        email, username, password, firstName, lastName, sex, matchSex,
                        birthDate, active, ip, hashValidation, groupId, membershipDate,
                        joinDate, lastActivity
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    db.table("Members")
                ))
                .bind(member.email.trim())
                .bind(member.username.trim())
                .bind(password_hash)
                .bind(&member.first_name)
                .bind(&member.last_name)
                .bind(member.sex.as_str())
                .bind(join_match_sex(&member.match_sex))
                .bind(member.birth_date.as_ref().map(format_date))
                .bind(active.as_i64())
                .bind(&member.ip)
                .bind(&member.hash_validation)
                .bind(group_id)
                .bind(&now)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn),
            )
            .await?;
        let profile_id = result.last_insert_rowid();

        let text = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or_default().to_string();

        db.run(
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (
                    profileId, middleName, country, city, state, zipCode,
                    description, website, socialNetworkSite
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                db.table("MembersInfo")
            ))
            .bind(profile_id)
            .bind(text(&member.middle_name))
            .bind(text(&member.country))
            .bind(text(&member.city))
            .bind(text(&member.state))
            .bind(text(&member.zip_code))
            .bind(text(&member.description))
            .bind(text(&member.website))
            .bind(text(&member.social_network_site))
            .execute(&mut *conn),
        )
        .await?;

        let privacy = MemberPrivacy::default();
        db.run(
            sqlx::query(&format!(
                "INSERT INTO {} (profileId, privacyProfile, searchProfile, userSaveViews) VALUES (?, ?, ?, ?)",
                db.table("MembersPrivacy")
            ))
            .bind(profile_id)
            .bind(privacy.privacy_profile.as_str())
            .bind(yes_no(privacy.search_profile))
            .bind(yes_no(privacy.user_save_views))
            .execute(&mut *conn),
        )
        .await?;

        let notification = MemberNotification::default();
        db.run(
            sqlx::query(&format!(
                "INSERT INTO {} (profileId, enableNewsletters, newMsg, friendRequest) VALUES (?, ?, ?, ?)",
                db.table("MembersNotifications")
            ))
            .bind(profile_id)
            .bind(notification.enable_newsletters)
            .bind(notification.new_msg)
            .bind(notification.friend_request)
            .execute(&mut *conn),
        )
        .await?;

        Ok(profile_id)
    }

    async fn purge_member(&self, conn: &mut SqliteConnection, profile_id: i64, username: &str) -> Result<()> {
        let db = &self.ctx.db;

        for (table, column) in DEPENDENT_ROWS {
            let sql = format!("DELETE FROM {} WHERE {} = ?", db.table(table), column);
            let result = db.run(sqlx::query(&sql).bind(profile_id).execute(&mut *conn)).await?;
            if result.rows_affected() > 0 {
                tracing::debug!("removed {} rows from {} for profile {}", result.rows_affected(), table, profile_id);
            }
        }

        let sql = format!("DELETE FROM {} WHERE fromUser = ? OR toUser = ?", db.table("Messenger"));
        db.run(sqlx::query(&sql).bind(username).bind(username).execute(&mut *conn))
            .await?;

        let sql = format!("DELETE FROM {} WHERE keyId LIKE ? ESCAPE '\\'", db.table("Likes"));
        db.run(
            sqlx::query(&sql)
                .bind(format!("%{}.html", escape_like(username)))
                .execute(&mut *conn),
        )
        .await?;

        for table in OWNED_ROWS {
            let sql = format!("DELETE FROM {} WHERE profileId = ?", db.table(table));
            db.run(sqlx::query(&sql).bind(profile_id).execute(&mut *conn)).await?;
        }

        Ok(())
    }
}

/// Escapes `LIKE` wildcards so `value` matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
impl MemberRepository for SqliteMemberRepository {
    async fn read(&self, profile_id: i64, realm: Realm) -> Result<Member> {
        let key = keys::member(realm, profile_id, "readProfile");
        let member: Option<Member> = self
            .ctx
            .cache
            .remember(&key, || self.fetch_member(profile_id, realm))
            .await?;

        member.ok_or_else(|| Self::not_found(realm, profile_id))
    }

    async fn get_field(&self, profile_id: i64, field: MemberField, realm: Realm) -> Result<FieldValue> {
        if field == MemberField::Username && profile_id == self.ctx.site.admin_profile_id {
            return Ok(FieldValue::Text(self.ctx.site.admin_label()));
        }

        let key = keys::member(realm, profile_id, field.cache_name());
        self.ctx
            .cache
            .remember(&key, || self.fetch_field(profile_id, field, realm))
            .await
    }

    async fn get_email(&self, profile_id: i64, realm: Realm) -> Result<String> {
        self.required_text(profile_id, MemberField::Email, realm).await
    }

    async fn get_username(&self, profile_id: i64, realm: Realm) -> Result<String> {
        self.required_text(profile_id, MemberField::Username, realm).await
    }

    async fn get_first_name(&self, profile_id: i64, realm: Realm) -> Result<Option<String>> {
        self.text_field(profile_id, MemberField::FirstName, realm).await
    }

    async fn get_sex(&self, profile_id: i64, realm: Realm) -> Result<Sex> {
        parse_sex(&self.required_text(profile_id, MemberField::Sex, realm).await?)
    }

    async fn get_sex_by_username(&self, username: &str, realm: Realm) -> Result<Sex> {
        let key = keys::sex_by_username(realm, username);
        let sex: String = self
            .ctx
            .cache
            .remember(&key, || async {
                let sql = format!("SELECT sex FROM {} WHERE username = ? LIMIT 1", self.ctx.table(realm));
                let sex: Option<String> = self
                    .ctx
                    .db
                    .run(sqlx::query_scalar(&sql).bind(username).fetch_optional(self.ctx.db.pool()))
                    .await?;
                sex.ok_or_else(|| AppError::NotFound(format!("{} username {} not found", realm, username)))
            })
            .await?;

        parse_sex(&sex)
    }

    async fn get_match_sex(&self, profile_id: i64) -> Result<Vec<Sex>> {
        let stored = self
            .text_field(profile_id, MemberField::MatchSex, Realm::Members)
            .await?
            .unwrap_or_default();
        Ok(parse_match_sex(&stored))
    }

    async fn get_birth_date(&self, profile_id: i64, realm: Realm) -> Result<Option<NaiveDate>> {
        match self.text_field(profile_id, MemberField::BirthDate, realm).await? {
            Some(date) => NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| AppError::Database(format!("Invalid birth date {}: {}", date, e))),
            None => Ok(None),
        }
    }

    async fn get_group_id(&self, profile_id: i64, realm: Realm) -> Result<i64> {
        self.get_field(profile_id, MemberField::GroupId, realm)
            .await?
            .as_int()
            .ok_or_else(|| AppError::Database(format!("groupId of profile {} is not an integer", profile_id)))
    }

    async fn resolve_id(&self, email: Option<&str>, username: Option<&str>, realm: Realm) -> Result<i64> {
        let (key, column, value) = match (non_empty(email), non_empty(username)) {
            (Some(email), _) => (keys::id_by_email(realm, email), "email", email),
            (None, Some(username)) => (keys::id_by_username(realm, username), "username", username),
            (None, None) => {
                return Err(AppError::InvalidArgument(
                    "An email or a username is required".to_string(),
                ))
            }
        };

        if let Some(profile_id) = self.ctx.cache.get::<i64>(&key).await {
            return Ok(profile_id);
        }

        let sql = format!("SELECT profileId FROM {} WHERE {} = ? LIMIT 1", self.ctx.table(realm), column);
        let profile_id: Option<i64> = self
            .ctx
            .db
            .run(sqlx::query_scalar(&sql).bind(value).fetch_optional(self.ctx.db.pool()))
            .await?;

        // Misses are not cached so a later registration is found.
        let profile_id = profile_id
            .ok_or_else(|| AppError::NotFound(format!("No {} account with {} {}", realm, column, value)))?;
        self.ctx.cache.put(&key, &profile_id).await;
        Ok(profile_id)
    }

    async fn update_field(&self, field: MemberField, value: FieldValue, profile_id: i64, realm: Realm) -> Result<()> {
        self.check_field_value(field, &value)?;
        if let (MemberField::GroupId, Some(group_id)) = (field, value.as_int()) {
            self.ensure_group_exists(group_id).await?;
        }
        let identity = self.fetch_identity(profile_id, realm).await?;

        let value = match value {
            FieldValue::Text(text) => FieldValue::Text(text.trim().to_string()),
            other => other,
        };
        self.touch(realm, profile_id, field.column(), value).await?;
        self.forget(realm, profile_id, &identity).await;

        tracing::debug!("{} of {} profile {} updated", field.column(), realm, profile_id);
        Ok(())
    }

    async fn set_last_activity(&self, profile_id: i64, realm: Realm) -> Result<()> {
        let now = self.ctx.clock.timestamp();
        self.touch(realm, profile_id, "lastActivity", FieldValue::Text(now)).await
    }

    async fn set_last_edit(&self, profile_id: i64, realm: Realm) -> Result<()> {
        let now = self.ctx.clock.timestamp();
        self.touch(realm, profile_id, "lastEdit", FieldValue::Text(now)).await
    }

    async fn approve(&self, profile_id: i64, state: ActiveState, realm: Realm) -> Result<()> {
        self.touch(realm, profile_id, "active", FieldValue::Int(state.as_i64())).await?;
        tracing::info!("{} profile {} set to {:?}", realm, profile_id, state);
        Ok(())
    }

    async fn add(&self, member: NewMember) -> Result<i64> {
        member.validate()?;

        let username = member.username.trim();
        if username.is_empty() {
            return Err(AppError::InvalidArgument("Username must not be blank".to_string()));
        }
        if self.ctx.site.is_ghost(username) {
            tracing::warn!("Refused to register the reserved username {}", username);
            return Err(AppError::InvalidArgument(format!("Username {} is reserved", username)));
        }
        match (&member.hash_validation, member.active) {
            (Some(hash), _) => check_validation_hash(hash)?,
            (None, Some(ActiveState::Pending)) => {
                return Err(AppError::InvalidArgument(
                    "A pending account needs a validation hash".to_string(),
                ))
            }
            (None, _) => {}
        }

        let password_hash = self.ctx.hasher.hash(&member.password)?;
        // Read before the transaction takes a connection.
        let settings = self.ctx.settings.system_settings().await?;

        let mut tx = self.ctx.db.begin().await?;
        let profile_id = match self
            .insert_member(&mut tx, &member, &password_hash, settings.default_membership_group_id)
            .await
        {
            Ok(profile_id) => profile_id,
            Err(e) => {
                tracing::error!("Registration of {} rolled back: {}", username, e);
                return Err(e);
            }
        };
        self.ctx.db.run(tx.commit()).await?;

        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        tracing::info!("Member {} registered with profile id {}", username, profile_id);
        Ok(profile_id)
    }

    async fn delete(&self, profile_id: i64, username: &str) -> Result<()> {
        if self.ctx.site.is_ghost(username) {
            tracing::warn!("Refused to delete the reserved user {}", username);
            return Err(AppError::Forbidden("The ghost user cannot be deleted".to_string()));
        }

        let members = self.ctx.db.table("Members");
        let mut tx = self.ctx.db.begin().await?;

        let stored: Option<(String, String)> = self
            .ctx
            .db
            .run(
                sqlx::query_as(&format!("SELECT email, username FROM {} WHERE profileId = ?", members))
                    .bind(profile_id)
                    .fetch_optional(&mut *tx),
            )
            .await?;

        let identity = match stored {
            None => return Err(Self::not_found(Realm::Members, profile_id)),
            Some((_, stored)) if stored != username => {
                return Err(AppError::InvalidArgument(format!(
                    "Profile {} does not belong to {}",
                    profile_id, username
                )))
            }
            Some((email, username)) => Identity { email, username },
        };

        if let Err(e) = self.purge_member(&mut tx, profile_id, username).await {
            tracing::error!("Deletion of profile {} rolled back: {}", profile_id, e);
            return Err(e);
        }
        self.ctx.db.run(tx.commit()).await?;

        self.forget(Realm::Members, profile_id, &identity).await;
        tracing::info!("Member {} (profile {}) deleted", username, profile_id);
        Ok(())
    }

    async fn get_username_list(&self, pattern: &str, realm: Realm) -> Result<Vec<UsernameEntry>> {
        let sql = format!(
            "SELECT profileId, username, sex FROM {} WHERE username <> ? AND username LIKE ? ORDER BY username",
            self.ctx.table(realm)
        );
        let rows = self
            .ctx
            .db
            .run(
                sqlx::query_as::<_, UsernameRow>(&sql)
                    .bind(&self.ctx.site.ghost_username)
                    .bind(format!("%{}%", pattern))
                    .fetch_all(self.ctx.db.pool()),
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(UsernameEntry {
                    profile_id: row.profile_id,
                    username: row.username,
                    sex: parse_sex(&row.sex)?,
                })
            })
            .collect()
    }

    async fn check_wait_join(&self, ip: &str, minutes: i64, now: DateTime<Utc>, realm: Realm) -> Result<bool> {
        // A window too wide for the calendar covers every account.
        let since = Duration::try_minutes(minutes)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let since = format_datetime(&since);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE ip = ? AND joinDate > ?",
            self.ctx.table(realm)
        );
        let recent: i64 = self
            .ctx
            .db
            .run(sqlx::query_scalar(&sql).bind(ip).bind(&since).fetch_one(self.ctx.db.pool()))
            .await?;

        if recent > 0 {
            tracing::debug!("{} joined less than {} minutes ago", ip, minutes);
        }
        Ok(recent == 0)
    }

    async fn total(&self, realm: Realm, days: i64, sex: Option<Sex>) -> Result<i64> {
        // Couples only exist among members.
        let sex = sex.filter(|sex| *sex != Sex::Couple || realm == Realm::Members);

        let mut sql = format!("SELECT COUNT(profileId) FROM {} WHERE username <> ?", self.ctx.table(realm));
        if days > 0 {
            sql.push_str(" AND joinDate > ?");
        }
        if sex.is_some() {
            sql.push_str(" AND sex = ?");
        }

        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(&self.ctx.site.ghost_username);
        if days > 0 {
            let since = Duration::try_days(days)
                .and_then(|window| self.ctx.now().checked_sub_signed(window))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            query = query.bind(format_datetime(&since));
        }
        if let Some(sex) = sex {
            query = query.bind(sex.as_str());
        }

        self.ctx.db.run(query.fetch_one(self.ctx.db.pool())).await
    }

    async fn get_info_fields(&self, profile_id: i64, realm: Realm) -> Result<MemberInfo> {
        let table = realm
            .info_table()
            .ok_or_else(|| AppError::InvalidIdentifier(format!("{} has no info fields", realm)))?;

        let key = keys::member(realm, profile_id, "infoFields");
        let info: Option<MemberInfo> = self
            .ctx
            .cache
            .remember(&key, || async {
                let sql = format!(
                    "SELECT middleName, country, city, state, zipCode, description, website, \
                     socialNetworkSite, height, weight FROM {} WHERE profileId = ? LIMIT 1",
                    self.ctx.db.table(table)
                );
                let row = self
                    .ctx
                    .db
                    .run(
                        sqlx::query_as::<_, InfoRow>(&sql)
                            .bind(profile_id)
                            .fetch_optional(self.ctx.db.pool()),
                    )
                    .await?;
                Ok::<_, AppError>(row.map(MemberInfo::from))
            })
            .await?;

        info.ok_or_else(|| Self::not_found(realm, profile_id))
    }

    async fn get_privacy_setting(&self, profile_id: i64) -> Result<MemberPrivacy> {
        let key = keys::member(Realm::Members, profile_id, "privacySetting");
        let privacy: Option<MemberPrivacy> = self
            .ctx
            .cache
            .remember(&key, || async {
                let sql = format!(
                    "SELECT privacyProfile, searchProfile, userSaveViews FROM {} WHERE profileId = ? LIMIT 1",
                    self.ctx.db.table("MembersPrivacy")
                );
                let row = self
                    .ctx
                    .db
                    .run(
                        sqlx::query_as::<_, PrivacyRow>(&sql)
                            .bind(profile_id)
                            .fetch_optional(self.ctx.db.pool()),
                    )
                    .await?;
                row.map(MemberPrivacy::try_from).transpose()
            })
            .await?;

        privacy.ok_or_else(|| Self::not_found(Realm::Members, profile_id))
    }

    async fn update_privacy_setting(&self, profile_id: i64, privacy: &MemberPrivacy) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET privacyProfile = ?, searchProfile = ?, userSaveViews = ? WHERE profileId = ?",
            self.ctx.db.table("MembersPrivacy")
        );
        let result = self
            .ctx
            .db
            .run(
                sqlx::query(&sql)
                    .bind(privacy.privacy_profile.as_str())
                    .bind(yes_no(privacy.search_profile))
                    .bind(yes_no(privacy.user_save_views))
                    .bind(profile_id)
                    .execute(self.ctx.db.pool()),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(Realm::Members, profile_id));
        }
        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        Ok(())
    }

    async fn get_notification(&self, profile_id: i64) -> Result<MemberNotification> {
        let key = keys::member(Realm::Members, profile_id, "notification");
        let notification: Option<MemberNotification> = self
            .ctx
            .cache
            .remember(&key, || async {
                let sql = format!(
                    "SELECT enableNewsletters, newMsg, friendRequest FROM {} WHERE profileId = ? LIMIT 1",
                    self.ctx.db.table("MembersNotifications")
                );
                let row = self
                    .ctx
                    .db
                    .run(
                        sqlx::query_as::<_, NotificationRow>(&sql)
                            .bind(profile_id)
                            .fetch_optional(self.ctx.db.pool()),
                    )
                    .await?;
                Ok::<_, AppError>(row.map(|row| MemberNotification {
                    enable_newsletters: row.enable_newsletters != 0,
                    new_msg: row.new_msg != 0,
                    friend_request: row.friend_request != 0,
                }))
            })
            .await?;

        notification.ok_or_else(|| Self::not_found(Realm::Members, profile_id))
    }

    async fn set_notification(&self, profile_id: i64, flag: NotificationFlag, enabled: bool) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE profileId = ?",
            self.ctx.db.table("MembersNotifications"),
            flag.column()
        );
        let result = self
            .ctx
            .db
            .run(
                sqlx::query(&sql)
                    .bind(enabled)
                    .bind(profile_id)
                    .execute(self.ctx.db.pool()),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(Realm::Members, profile_id));
        }
        self.ctx.cache.clear_member(Realm::Members, profile_id).await;
        Ok(())
    }

    async fn is_notification(&self, profile_id: i64, flag: NotificationFlag) -> Result<bool> {
        let key = keys::member(
            Realm::Members,
            profile_id,
            &format!("isNotification/{}", flag.column()),
        );
        self.ctx
            .cache
            .remember(&key, || async {
                let sql = format!(
                    "SELECT COUNT(*) FROM {} WHERE profileId = ? AND {} = 1",
                    self.ctx.db.table("MembersNotifications"),
                    flag.column()
                );
                let count: i64 = self
                    .ctx
                    .db
                    .run(sqlx::query_scalar(&sql).bind(profile_id).fetch_one(self.ctx.db.pool()))
                    .await?;
                Ok::<_, AppError>(count > 0)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("alice"), "alice");
        assert_eq!(escape_like("a_b%c\\"), "a\\_b\\%c\\\\");
    }

    #[test]
    fn test_cascade_keeps_forum_rows() {
        assert!(DEPENDENT_ROWS.iter().all(|(table, _)| !table.starts_with("Forums")));
        assert!(!OWNED_ROWS.iter().any(|table| table.starts_with("Forums")));
        assert_eq!(OWNED_ROWS.last(), Some(&"Members"));
    }
}
