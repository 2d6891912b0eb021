//! Member search and the public profile listings.
//!
//! Statements are assembled with [`QueryBuilder`] so every user-supplied value
//! is bound, never interpolated. Only trusted fragments (prefixed table names,
//! the closed set of order columns, hidden group ids) are pushed as SQL text.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Months, Utc};
use sqlx::{QueryBuilder, Sqlite};

use crate::{
    db::{format_date, format_datetime},
    domain::{
        order_clause, MemberProfile, Pagination, Realm, SearchMode, SearchOrder, SearchQuery,
        SearchResult, SortDirection, SystemSettings, UserStatus, HIDDEN_GROUP_IDS,
    },
    error::Result,
    repository::{
        rows::{rows_into, ProfileRow, MEMBER_COLUMNS, PROFILE_COLUMNS},
        DataContext, SearchRepository,
    },
};

/// Everything a search needs besides the query itself.
#[derive(Debug, Clone)]
pub struct SearchEnv {
    pub members_table: String,
    pub info_table: String,
    pub privacy_table: String,
    pub ghost_username: String,
    /// Excluded from results when present.
    pub actor_id: Option<i64>,
    pub now: DateTime<Utc>,
    pub user_timeout_minutes: i64,
}

/// A value takes part in a predicate only when it is non-empty and has no whitespace.
fn usable(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && !v.chars().any(char::is_whitespace))
}

fn select_clause(mode: SearchMode) -> String {
    match mode {
        SearchMode::Count => "COUNT(m.profileId)".to_string(),
        SearchMode::Page { .. } => format!("{}, {}", MEMBER_COLUMNS, PROFILE_COLUMNS),
    }
}

/// Opens the statement and applies the visibility baseline shared by every listing.
fn visible_members(select: &str, env: &SearchEnv) -> QueryBuilder<'static, Sqlite> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {} FROM {} m LEFT JOIN {} i ON i.profileId = m.profileId \
         LEFT JOIN {} p ON p.profileId = m.profileId WHERE m.username <> ",
        select, env.members_table, env.info_table, env.privacy_table
    ));
    builder.push_bind(env.ghost_username.clone());

    let hidden = HIDDEN_GROUP_IDS
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    builder.push(format!(
        " AND p.searchProfile = 'yes' AND m.groupId NOT IN ({}) AND m.ban = 0",
        hidden
    ));
    builder
}

/// Drops rows missing any identity column a public listing shows.
fn complete_identity(builder: &mut QueryBuilder<'static, Sqlite>) {
    builder.push(
        " AND m.firstName IS NOT NULL AND m.sex IS NOT NULL AND m.matchSex IS NOT NULL \
         AND i.country IS NOT NULL AND i.city IS NOT NULL",
    );
}

fn exclude_actor(builder: &mut QueryBuilder<'static, Sqlite>, env: &SearchEnv) {
    if let Some(actor_id) = env.actor_id {
        builder.push(" AND m.profileId <> ").push_bind(actor_id);
    }
}

fn avatar_only(builder: &mut QueryBuilder<'static, Sqlite>) {
    builder.push(" AND m.avatar IS NOT NULL AND m.approvedAvatar = 1");
}

fn limit(builder: &mut QueryBuilder<'static, Sqlite>, page: Pagination) {
    builder
        .push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
}

/// Builds the member search statement for `mode`.
///
/// An email predicate turns the search into an email lookup: names, age,
/// demographics, the avatar filter and actor exclusion are all skipped. Unusable values are
/// dropped silently. Negative pagination is the only rejected input.
pub fn build_search(
    query: &SearchQuery,
    mode: SearchMode,
    env: &SearchEnv,
) -> Result<QueryBuilder<'static, Sqlite>> {
    let page = match mode {
        SearchMode::Count => None,
        SearchMode::Page { offset, limit } => Some(Pagination::new(offset, limit)?),
    };

    let mut builder = visible_members(&select_clause(mode), env);

    if let Some(email) = usable(&query.email) {
        builder.push(" AND m.email LIKE ").push_bind(format!("%{}%", email));
    } else {
        exclude_actor(&mut builder, env);
        push_demographics(&mut builder, query, env);
        if query.avatar {
            avatar_only(&mut builder);
        }
    }

    if let Some(page) = page {
        builder.push(order_clause(
            query.order.unwrap_or(SearchOrder::Latest),
            query.sort.unwrap_or(SortDirection::Asc),
        ));
        limit(&mut builder, page);
    }

    Ok(builder)
}

fn push_demographics(builder: &mut QueryBuilder<'static, Sqlite>, query: &SearchQuery, env: &SearchEnv) {
    for (column, value) in [
        ("m.firstName", &query.first_name),
        ("i.middleName", &query.middle_name),
        ("m.lastName", &query.last_name),
    ] {
        if let Some(value) = usable(value) {
            builder.push(format!(" AND {} = ", column)).push_bind(value.to_string());
        }
    }

    let today = env.now.date_naive();
    match (query.age, query.min_age, query.max_age) {
        (Some(age), _, _) if age > 0 => {
            let year = i32::try_from(age).ok().and_then(|age| env.now.year().checked_sub(age));
            if let Some(year) = year {
                builder.push(" AND m.birthDate LIKE ").push_bind(format!("%{}%", year));
            }
        }
        (_, Some(min_age), Some(max_age)) => {
            let earliest = today.checked_sub_months(Months::new(max_age.saturating_mul(12)));
            let latest = today.checked_sub_months(Months::new(min_age.saturating_mul(12)));
            if let (Some(earliest), Some(latest)) = (earliest, latest) {
                builder
                    .push(" AND m.birthDate BETWEEN ")
                    .push_bind(format_date(&earliest))
                    .push(" AND ")
                    .push_bind(format_date(&latest));
            }
        }
        _ => {}
    }

    if let Some(height) = query.height.filter(|h| *h > 0) {
        builder.push(" AND i.height = ").push_bind(height);
    }
    if let Some(weight) = query.weight.filter(|w| *w > 0) {
        builder.push(" AND i.weight = ").push_bind(weight);
    }

    if let Some(country) = usable(&query.country) {
        builder.push(" AND i.country = ").push_bind(country.to_string());
    }
    if let Some(city) = usable(&query.city) {
        builder
            .push(" AND i.city LIKE ")
            .push_bind(format!("%{}%", city.replace('-', " ")));
    }
    if let Some(state) = usable(&query.state) {
        builder
            .push(" AND i.state LIKE ")
            .push_bind(format!("%{}%", state.replace('-', " ")));
    }
    if let Some(zip_code) = usable(&query.zip_code) {
        builder.push(" AND i.zipCode LIKE ").push_bind(format!("%{}%", zip_code));
    }

    if !query.sex.is_empty() {
        builder.push(" AND m.sex IN (");
        let mut sexes = builder.separated(", ");
        for sex in &query.sex {
            sexes.push_bind(sex.as_str());
        }
        sexes.push_unseparated(")");
    }
    if let Some(match_sex) = query.match_sex {
        builder
            .push(" AND m.matchSex LIKE ")
            .push_bind(format!("%{}%", match_sex.as_str()));
    }

    if query.online {
        // An unrepresentable window reaches back to the start of time
        let since = Duration::try_minutes(env.user_timeout_minutes)
            .and_then(|window| env.now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        builder
            .push(" AND m.userStatus = ")
            .push_bind(UserStatus::Online.as_i64())
            .push(" AND m.lastActivity > ")
            .push_bind(format_datetime(&since));
    }
}

/// Listing of every visible member with complete identity columns.
pub fn build_profiles(
    order: SearchOrder,
    page: Option<Pagination>,
    avatars_only: bool,
    env: &SearchEnv,
) -> QueryBuilder<'static, Sqlite> {
    let mut builder = visible_members(&select_clause(SearchMode::Page { offset: 0, limit: 0 }), env);
    complete_identity(&mut builder);
    exclude_actor(&mut builder, env);
    if avatars_only {
        avatar_only(&mut builder);
    }
    builder.push(order_clause(order, SortDirection::Desc));
    if let Some(page) = page {
        limit(&mut builder, page);
    }
    builder
}

/// Visible members of one country, optionally narrowed to a city.
pub fn build_geo_profiles(
    country: &str,
    city: Option<&str>,
    mode: SearchMode,
    order: SearchOrder,
    env: &SearchEnv,
) -> Result<QueryBuilder<'static, Sqlite>> {
    let page = match mode {
        SearchMode::Count => None,
        SearchMode::Page { offset, limit } => Some(Pagination::new(offset, limit)?),
    };

    let mut builder = visible_members(&select_clause(mode), env);
    complete_identity(&mut builder);
    builder.push(" AND i.country = ").push_bind(country.to_string());
    if let Some(city) = city.filter(|c| !c.is_empty()) {
        builder.push(" AND i.city LIKE ").push_bind(format!("%{}%", city));
    }
    exclude_actor(&mut builder, env);

    if let Some(page) = page {
        builder.push(order_clause(order, SortDirection::Desc));
        limit(&mut builder, page);
    }
    Ok(builder)
}

pub struct SqliteSearchRepository {
    ctx: DataContext,
}

impl SqliteSearchRepository {
    pub fn new(ctx: DataContext) -> Self {
        Self { ctx }
    }

    fn env(&self, settings: &SystemSettings) -> SearchEnv {
        SearchEnv {
            members_table: self.ctx.table(Realm::Members),
            info_table: self.ctx.db.table("MembersInfo"),
            privacy_table: self.ctx.db.table("MembersPrivacy"),
            ghost_username: self.ctx.site.ghost_username.clone(),
            actor_id: self.ctx.actor_id(),
            now: self.ctx.now(),
            user_timeout_minutes: settings.user_timeout_minutes,
        }
    }

    async fn execute(&self, mut builder: QueryBuilder<'static, Sqlite>, mode: SearchMode) -> Result<SearchResult> {
        tracing::debug!("search: {}", builder.sql());
        match mode {
            SearchMode::Count => {
                let count: i64 = self
                    .ctx
                    .db
                    .run(builder.build_query_scalar().fetch_one(self.ctx.db.pool()))
                    .await?;
                Ok(SearchResult::Count(count))
            }
            SearchMode::Page { .. } => Ok(SearchResult::Rows(self.fetch_profiles(builder).await?)),
        }
    }

    async fn fetch_profiles(&self, mut builder: QueryBuilder<'static, Sqlite>) -> Result<Vec<MemberProfile>> {
        let rows: Vec<ProfileRow> = self
            .ctx
            .db
            .run(builder.build_query_as().fetch_all(self.ctx.db.pool()))
            .await?;
        rows_into(rows)
    }
}

#[async_trait]
impl SearchRepository for SqliteSearchRepository {
    async fn search(&self, query: &SearchQuery, mode: SearchMode) -> Result<SearchResult> {
        let env = self.env(&self.ctx.settings.system_settings().await?);
        let builder = build_search(query, mode, &env)?;
        self.execute(builder, mode).await
    }

    async fn get_profiles(&self, order: SearchOrder, page: Option<Pagination>) -> Result<Vec<MemberProfile>> {
        let settings = self.ctx.settings.system_settings().await?;
        let env = self.env(&settings);
        self.fetch_profiles(build_profiles(order, page, settings.profile_with_avatar_set, &env))
            .await
    }

    async fn get_geo_profiles(
        &self,
        country: &str,
        city: Option<&str>,
        mode: SearchMode,
        order: SearchOrder,
    ) -> Result<SearchResult> {
        let env = self.env(&self.ctx.settings.system_settings().await?);
        let builder = build_geo_profiles(country, city, mode, order, &env)?;
        self.execute(builder, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sex;
    use crate::error::AppError;
    use chrono::TimeZone;

    fn env() -> SearchEnv {
        SearchEnv {
            members_table: "Members".to_string(),
            info_table: "MembersInfo".to_string(),
            privacy_table: "MembersPrivacy".to_string(),
            ghost_username: "ghost".to_string(),
            actor_id: Some(42),
            now: Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap(),
            user_timeout_minutes: 1,
        }
    }

    fn page() -> SearchMode {
        SearchMode::Page { offset: 0, limit: 10 }
    }

    #[test]
    fn test_baseline_is_always_applied() {
        let builder = build_search(&SearchQuery::default(), SearchMode::Count, &env()).unwrap();
        let sql = builder.sql();
        assert!(sql.starts_with("SELECT COUNT(m.profileId) FROM Members m"));
        assert!(sql.contains("m.username <> ?"));
        assert!(sql.contains("p.searchProfile = 'yes'"));
        assert!(sql.contains("m.groupId NOT IN (1, 9)"));
        assert!(sql.contains("m.ban = 0"));
        assert!(sql.contains("m.profileId <> ?"));
        assert!(!sql.contains("ORDER BY"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_email_disables_other_predicates() {
        let query = SearchQuery {
            email: Some("ann@".to_string()),
            first_name: Some("Ann".to_string()),
            country: Some("FR".to_string()),
            sex: vec![Sex::Female],
            online: true,
            ..Default::default()
        };
        let builder = build_search(&query, page(), &env()).unwrap();
        let sql = builder.sql();
        assert!(sql.contains("m.email LIKE ?"));
        assert!(!sql.contains("m.firstName"));
        assert!(!sql.contains("i.country"));
        assert!(!sql.contains("m.sex IN"));
        assert!(!sql.contains("m.userStatus"));
        assert!(!sql.contains("m.profileId <> ?"));
    }

    #[test]
    fn test_values_with_whitespace_are_dropped() {
        let query = SearchQuery {
            email: Some("a b".to_string()),
            first_name: Some("".to_string()),
            last_name: Some("Smith".to_string()),
            city: Some("New York".to_string()),
            ..Default::default()
        };
        let builder = build_search(&query, page(), &env()).unwrap();
        let sql = builder.sql();
        assert!(!sql.contains("m.email"));
        assert!(!sql.contains("m.firstName"));
        assert!(sql.contains("m.lastName = ?"));
        assert!(!sql.contains("i.city"));
    }

    #[test]
    fn test_sex_list_and_default_order() {
        let query = SearchQuery {
            sex: vec![Sex::Male, Sex::Couple],
            country: Some("FR".to_string()),
            ..Default::default()
        };
        let builder = build_search(&query, page(), &env()).unwrap();
        let sql = builder.sql();
        assert!(sql.contains("m.sex IN (?, ?)"));
        assert!(sql.contains("i.country = ?"));
        assert!(sql.ends_with(" ORDER BY m.joinDate ASC LIMIT ? OFFSET ?"));
    }

    #[test]
    fn test_single_age_wins_over_range() {
        let query = SearchQuery {
            age: Some(30),
            min_age: Some(20),
            max_age: Some(40),
            ..Default::default()
        };
        let sql = build_search(&query, SearchMode::Count, &env()).unwrap().sql().to_string();
        assert!(sql.contains("m.birthDate LIKE ?"));
        assert!(!sql.contains("BETWEEN"));

        let query = SearchQuery { min_age: Some(20), max_age: Some(40), ..Default::default() };
        let sql = build_search(&query, SearchMode::Count, &env()).unwrap().sql().to_string();
        assert!(sql.contains("m.birthDate BETWEEN ? AND ?"));

        let query = SearchQuery { min_age: Some(20), ..Default::default() };
        let sql = build_search(&query, SearchMode::Count, &env()).unwrap().sql().to_string();
        assert!(!sql.contains("birthDate"));
    }

    #[test]
    fn test_zero_age_falls_back_to_range() {
        let query = SearchQuery {
            age: Some(0),
            min_age: Some(20),
            max_age: Some(40),
            ..Default::default()
        };
        let sql = build_search(&query, SearchMode::Count, &env()).unwrap().sql().to_string();
        assert!(sql.contains("m.birthDate BETWEEN ? AND ?"));
        assert!(!sql.contains("m.birthDate LIKE"));
    }

    #[test]
    fn test_email_lookup_skips_avatar_filter() {
        let query = SearchQuery { email: Some("ann@".to_string()), avatar: true, ..Default::default() };
        let sql = build_search(&query, SearchMode::Count, &env()).unwrap().sql().to_string();
        assert!(sql.contains("m.email LIKE ?"));
        assert!(!sql.contains("m.approvedAvatar"));
    }

    #[test]
    fn test_online_and_avatar_filters() {
        let query = SearchQuery { online: true, avatar: true, ..Default::default() };
        let sql = build_search(&query, SearchMode::Count, &env()).unwrap().sql().to_string();
        assert!(sql.contains("m.userStatus = ? AND m.lastActivity > ?"));
        assert!(sql.contains("m.avatar IS NOT NULL AND m.approvedAvatar = 1"));
    }

    #[test]
    fn test_negative_pagination_is_rejected() {
        let result = build_search(&SearchQuery::default(), SearchMode::Page { offset: -1, limit: 10 }, &env());
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_anonymous_search_excludes_nobody() {
        let env = SearchEnv { actor_id: None, ..env() };
        let sql = build_search(&SearchQuery::default(), page(), &env).unwrap().sql().to_string();
        assert!(!sql.contains("m.profileId <> ?"));
    }

    #[test]
    fn test_profiles_listing_orders_descending() {
        let builder = build_profiles(SearchOrder::LastActivity, None, true, &env());
        let sql = builder.sql();
        assert!(sql.contains("i.country IS NOT NULL"));
        assert!(sql.contains("m.approvedAvatar = 1"));
        assert!(sql.ends_with(" ORDER BY m.lastActivity DESC"));
    }

    #[test]
    fn test_geo_count_ignores_pagination() {
        let builder = build_geo_profiles("FR", Some("Paris"), SearchMode::Count, SearchOrder::Latest, &env()).unwrap();
        let sql = builder.sql();
        assert!(sql.contains("i.country = ?"));
        assert!(sql.contains("i.city LIKE ?"));
        assert!(sql.contains("m.firstName IS NOT NULL"));
        assert!(sql.contains("i.city IS NOT NULL"));
        assert!(!sql.contains("LIMIT"));
    }
}
