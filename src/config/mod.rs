use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

/// Upper bound for any cached value.
pub const MAX_CACHE_TTL_SECS: u64 = 604_800;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

/// Site-global reserved identities.
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub site_name: String,
    pub ghost_username: String,
    /// Sender id of site messages, never a real account.
    pub admin_profile_id: i64,
    /// `{site_name}` is replaced with `site_name`.
    pub admin_label: String,
}

/// Static fallbacks for the runtime system settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SystemConfig {
    pub default_membership_group_id: i64,
    pub user_timeout_minutes: i64,
    pub profile_with_avatar_set: bool,
    pub reveal_login_failure_reason: bool,
}

fn default_statement_timeout() -> u64 {
    10
}

impl CacheConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_secs.min(MAX_CACHE_TTL_SECS))
    }
}

impl SiteConfig {
    pub fn admin_label(&self) -> String {
        self.admin_label.replace("{site_name}", &self.site_name)
    }

    pub fn is_ghost(&self, username: &str) -> bool {
        username == self.ghost_username
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: MAX_CACHE_TTL_SECS,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_name: "Udal".to_string(),
            ghost_username: "ghost".to_string(),
            admin_profile_id: 0,
            admin_label: "Administration of {site_name}".to_string(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            default_membership_group_id: 2,
            user_timeout_minutes: 1,
            profile_with_avatar_set: false,
            reveal_login_failure_reason: true,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("database.url", "sqlite://udal.db")?
            .set_default("database.max_connections", 10)?
            .set_default("database.table_prefix", "")?
            .set_default("database.statement_timeout_secs", 10)?
            .set_default("cache.enabled", true)?
            .set_default("cache.ttl_secs", MAX_CACHE_TTL_SECS)?
            .set_default("site.site_name", "Udal")?
            .set_default("site.ghost_username", "ghost")?
            .set_default("site.admin_profile_id", 0)?
            .set_default("site.admin_label", "Administration of {site_name}")?
            .set_default("system.default_membership_group_id", 2)?
            .set_default("system.user_timeout_minutes", 1)?
            .set_default("system.profile_with_avatar_set", false)?
            .set_default("system.reveal_login_failure_reason", true)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with UDAL__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("UDAL").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://udal.db".to_string(),
                max_connections: 10,
                table_prefix: String::new(),
                statement_timeout_secs: default_statement_timeout(),
            },
            cache: CacheConfig::default(),
            site: SiteConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_is_clamped_to_one_week() {
        let cache = CacheConfig { enabled: true, ttl_secs: 10 * MAX_CACHE_TTL_SECS };
        assert_eq!(cache.ttl().as_secs(), MAX_CACHE_TTL_SECS);
    }

    #[test]
    fn test_admin_label_renders_site_name() {
        let site = SiteConfig::default();
        assert_eq!(site.admin_label(), "Administration of Udal");
        assert!(site.is_ghost("ghost"));
        assert!(!site.is_ghost("Ghost"));
    }
}
