use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    auth::{Argon2Hasher, IpProvider, MemorySessionStore, PasswordHasher, SessionStore, StaticIp},
    cache::UserCache,
    clock::{Clock, SystemClock},
    config::{Settings, SiteConfig},
    db::Database,
    domain::*,
    error::Result,
    service::settings_service::{SettingsProvider, SettingsService},
};

pub mod auth_repository;
pub mod media_repository;
pub mod member_repository;
pub mod membership_repository;
pub mod presence_repository;
pub mod search_repository;
pub(crate) mod rows;

pub use auth_repository::SqliteAuthRepository;
pub use media_repository::SqliteMediaRepository;
pub use member_repository::SqliteMemberRepository;
pub use membership_repository::SqliteMembershipRepository;
pub use presence_repository::SqlitePresenceRepository;
pub use search_repository::{build_search, SearchEnv, SqliteSearchRepository};

/// Collaborators shared by every repository.
#[derive(Clone)]
pub struct DataContext {
    pub db: Database,
    pub cache: UserCache,
    pub clock: Arc<dyn Clock>,
    pub session: Arc<dyn SessionStore>,
    pub settings: Arc<dyn SettingsProvider>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub ip: Arc<dyn IpProvider>,
    pub site: SiteConfig,
}

impl DataContext {
    /// Production wiring: system clock, argon2, settings read from the database.
    ///
    /// The session starts anonymous. Request handlers bind their own with
    /// [`DataContext::with_session`] or `ServiceContext::for_session`.
    pub fn new(db: Database, settings: &Settings) -> Self {
        Self {
            cache: UserCache::from_config(&settings.cache),
            clock: Arc::new(SystemClock),
            session: Arc::new(MemorySessionStore::new()),
            settings: Arc::new(SettingsService::new(db.clone(), settings.system.clone())),
            hasher: Arc::new(Argon2Hasher),
            ip: Arc::new(StaticIp::default()),
            site: settings.site.clone(),
            db,
        }
    }

    pub fn with_cache(mut self, cache: UserCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = session;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_ip(mut self, ip: Arc<dyn IpProvider>) -> Self {
        self.ip = ip;
        self
    }

    /// Profile id of the acting member, if the session carries one.
    pub fn actor_id(&self) -> Option<i64> {
        self.session.member_id()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Prefixed table name of a realm.
    pub fn table(&self, realm: Realm) -> String {
        self.db.table(realm.table())
    }
}

#[async_trait]
pub trait MemberRepository: Send + Sync {
    async fn read(&self, profile_id: i64, realm: Realm) -> Result<Member>;
    async fn get_field(&self, profile_id: i64, field: MemberField, realm: Realm) -> Result<FieldValue>;
    async fn get_email(&self, profile_id: i64, realm: Realm) -> Result<String>;
    async fn get_username(&self, profile_id: i64, realm: Realm) -> Result<String>;
    async fn get_first_name(&self, profile_id: i64, realm: Realm) -> Result<Option<String>>;
    async fn get_sex(&self, profile_id: i64, realm: Realm) -> Result<Sex>;
    async fn get_sex_by_username(&self, username: &str, realm: Realm) -> Result<Sex>;
    async fn get_match_sex(&self, profile_id: i64) -> Result<Vec<Sex>>;
    async fn get_birth_date(&self, profile_id: i64, realm: Realm) -> Result<Option<NaiveDate>>;
    async fn get_group_id(&self, profile_id: i64, realm: Realm) -> Result<i64>;
    async fn resolve_id(&self, email: Option<&str>, username: Option<&str>, realm: Realm) -> Result<i64>;
    async fn update_field(&self, field: MemberField, value: FieldValue, profile_id: i64, realm: Realm) -> Result<()>;
    async fn set_last_activity(&self, profile_id: i64, realm: Realm) -> Result<()>;
    async fn set_last_edit(&self, profile_id: i64, realm: Realm) -> Result<()>;
    async fn approve(&self, profile_id: i64, state: ActiveState, realm: Realm) -> Result<()>;
    async fn add(&self, member: NewMember) -> Result<i64>;
    async fn delete(&self, profile_id: i64, username: &str) -> Result<()>;
    async fn get_username_list(&self, pattern: &str, realm: Realm) -> Result<Vec<UsernameEntry>>;
    async fn check_wait_join(&self, ip: &str, minutes: i64, now: DateTime<Utc>, realm: Realm) -> Result<bool>;
    async fn total(&self, realm: Realm, days: i64, sex: Option<Sex>) -> Result<i64>;
    async fn get_info_fields(&self, profile_id: i64, realm: Realm) -> Result<MemberInfo>;
    async fn get_privacy_setting(&self, profile_id: i64) -> Result<MemberPrivacy>;
    async fn update_privacy_setting(&self, profile_id: i64, privacy: &MemberPrivacy) -> Result<()>;
    async fn get_notification(&self, profile_id: i64) -> Result<MemberNotification>;
    async fn set_notification(&self, profile_id: i64, flag: NotificationFlag, enabled: bool) -> Result<()>;
    async fn is_notification(&self, profile_id: i64, flag: NotificationFlag) -> Result<bool>;
}

#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn set_avatar(&self, profile_id: i64, path: Option<&str>, approved: bool) -> Result<()>;
    async fn delete_avatar(&self, profile_id: i64) -> Result<()>;
    async fn get_avatar(&self, profile_id: i64, approved: Option<bool>) -> Result<Avatar>;
    async fn get_background(&self, profile_id: i64, approved: Option<bool>) -> Result<Option<Background>>;
    async fn add_background(&self, profile_id: i64, file: &str, approved: bool) -> Result<()>;
    async fn delete_background(&self, profile_id: i64) -> Result<()>;
}

#[async_trait]
pub trait PresenceRepository: Send + Sync {
    async fn is_online(&self, profile_id: i64, minutes: i64) -> Result<bool>;
    async fn set_user_status(&self, profile_id: i64, status: UserStatus) -> Result<()>;
    async fn get_user_status(&self, profile_id: i64) -> Result<UserStatus>;
}

#[async_trait]
pub trait SearchRepository: Send + Sync {
    async fn search(&self, query: &SearchQuery, mode: SearchMode) -> Result<SearchResult>;
    async fn get_profiles(&self, order: SearchOrder, page: Option<Pagination>) -> Result<Vec<MemberProfile>>;
    async fn get_geo_profiles(
        &self,
        country: &str,
        city: Option<&str>,
        mode: SearchMode,
        order: SearchOrder,
    ) -> Result<SearchResult>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn check_group(&self, session: &dyn SessionStore) -> Result<Permissions>;
    async fn get_memberships(&self) -> Result<Vec<Membership>>;
    async fn get_membership(&self, group_id: i64) -> Result<Membership>;
    async fn add_membership(&self, membership: NewMembership) -> Result<i64>;
    async fn update_membership_group(&self, group_id: i64, change: MembershipChange) -> Result<()>;
    async fn delete_membership(&self, group_id: i64) -> Result<()>;
    async fn get_membership_details(&self, profile_id: i64) -> Result<MembershipDetails>;
    async fn check_membership_expiration(&self, profile_id: i64, now: DateTime<Utc>) -> Result<bool>;
    async fn update_membership(&self, group_id: i64, profile_id: i64, since: Option<DateTime<Utc>>) -> Result<()>;
}

#[async_trait]
pub trait AuthRepository: Send + Sync {
    async fn login(&self, email: &str, password: &str, realm: Realm) -> Result<()>;
    async fn session_log(&self, email: &str, username: &str, first_name: Option<&str>, realm: Realm) -> Result<()>;
    async fn change_password(&self, email: &str, new_password: &str, realm: Realm) -> Result<()>;
    async fn set_new_hash_validation(&self, profile_id: i64, hash: &str, realm: Realm) -> Result<()>;
    async fn check_hash_validation(&self, email: &str, hash: &str, realm: Realm) -> Result<bool>;
    async fn get_hash_validation(&self, email: &str, realm: Realm) -> Result<HashValidation>;
    async fn validate_account(&self, email: &str, hash: &str, realm: Realm) -> Result<bool>;
}
