#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use udal::{
    auth::{MemorySessionStore, PasswordHasher},
    cache::{MemoryCache, UserCache},
    clock::ManualClock,
    config::{Settings, SystemConfig},
    db::Database,
    domain::{ActiveState, NewMember, Sex, SystemSettings},
    error::Result,
    repository::DataContext,
    service::{
        settings_service::{SettingsService, StaticSettings},
        ServiceContext,
    },
};

/// Reversible stand-in for argon2 so tests stay fast.
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> Result<String> {
        Ok(format!("plain${}", password))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        Ok(hash == format!("plain${}", password))
    }
}

pub struct TestApp {
    pub services: ServiceContext,
    pub db: Database,
    pub clock: ManualClock,
    pub session: Arc<MemorySessionStore>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

pub async fn setup() -> anyhow::Result<TestApp> {
    setup_with(SystemSettings::from(&SystemConfig::default())).await
}

pub async fn setup_with(system: SystemSettings) -> anyhow::Result<TestApp> {
    // One connection that never expires keeps the in-memory database alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    let db = Database::new(pool, "", Duration::from_secs(10));
    db.migrate().await?;

    let settings = Settings::default();
    let clock = ManualClock::new(start_time());
    let session = Arc::new(MemorySessionStore::new());

    let data = DataContext::new(db.clone(), &settings)
        .with_cache(UserCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(600)))
        .with_clock(Arc::new(clock.clone()))
        .with_session(session.clone())
        .with_settings(Arc::new(StaticSettings(system)))
        .with_hasher(Arc::new(PlainHasher));
    let services = ServiceContext::new(data, SettingsService::new(db.clone(), settings.system.clone()));

    Ok(TestApp { services, db, clock, session })
}

pub fn new_member(email: &str, username: &str) -> NewMember {
    NewMember {
        email: email.to_string(),
        username: username.to_string(),
        password: "pw".to_string(),
        first_name: Some("Test".to_string()),
        last_name: Some("Member".to_string()),
        sex: Sex::Female,
        match_sex: vec![Sex::Male],
        birth_date: NaiveDate::from_ymd_opt(1990, 6, 1),
        ip: "1.2.3.4".to_string(),
        country: Some("FR".to_string()),
        city: Some("Paris".to_string()),
        ..Default::default()
    }
}

pub fn pending_member(email: &str, username: &str, hash: &str) -> NewMember {
    NewMember {
        hash_validation: Some(hash.to_string()),
        active: Some(ActiveState::Pending),
        ..new_member(email, username)
    }
}

pub async fn count_rows(db: &Database, table: &str, column: &str, profile_id: i64) -> anyhow::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, column);
    Ok(sqlx::query_scalar(&sql).bind(profile_id).fetch_one(db.pool()).await?)
}
