use async_trait::async_trait;
use sqlx::FromRow;

use crate::{
    config::SystemConfig,
    db::Database,
    domain::{SystemSetting, SystemSettings},
    error::{AppError, Result},
};

/// Source of the runtime system settings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn system_settings(&self) -> Result<SystemSettings>;
}

#[derive(FromRow)]
struct SettingRow {
    name: String,
    value: String,
}

/// Reads the `Settings` table, falling back to configured values.
pub struct SettingsService {
    db: Database,
    fallback: SystemConfig,
}

impl SettingsService {
    pub fn new(db: Database, fallback: SystemConfig) -> Self {
        Self { db, fallback }
    }

    pub async fn get_setting(&self, name: &str) -> Result<SystemSetting> {
        let sql = format!("SELECT name, value FROM {} WHERE name = ?", self.db.table("Settings"));
        let row = self
            .db
            .run(
                sqlx::query_as::<_, SettingRow>(&sql)
                    .bind(name)
                    .fetch_optional(self.db.pool()),
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Setting not found: {}", name)))?;

        Ok(Self::row_to_setting(row))
    }

    fn row_to_setting(row: SettingRow) -> SystemSetting {
        SystemSetting {
            name: row.name,
            value: row.value,
        }
    }

    pub async fn get_all_settings(&self) -> Result<Vec<SystemSetting>> {
        let sql = format!("SELECT name, value FROM {} ORDER BY name", self.db.table("Settings"));
        let rows = self
            .db
            .run(sqlx::query_as::<_, SettingRow>(&sql).fetch_all(self.db.pool()))
            .await?;

        Ok(rows.into_iter().map(Self::row_to_setting).collect())
    }

    pub async fn update_setting(&self, name: &str, value: &str) -> Result<SystemSetting> {
        let sql = format!("UPDATE {} SET value = ? WHERE name = ?", self.db.table("Settings"));
        let result = self
            .db
            .run(sqlx::query(&sql).bind(value).bind(name).execute(self.db.pool()))
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Setting not found: {}", name)));
        }

        tracing::info!("Setting {} updated", name);
        self.get_setting(name).await
    }
}

#[async_trait]
impl SettingsProvider for SettingsService {
    async fn system_settings(&self) -> Result<SystemSettings> {
        let settings = self.get_all_settings().await?;
        Ok(SystemSettings::from_settings(&settings, &self.fallback))
    }
}

/// Serves the configured values without touching storage.
pub struct StaticSettings(pub SystemSettings);

impl StaticSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        StaticSettings(SystemSettings::from(config))
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn system_settings(&self) -> Result<SystemSettings> {
        Ok(self.0.clone())
    }
}
