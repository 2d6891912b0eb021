use serde::{Deserialize, Serialize};

use crate::config::SystemConfig;

/// One row of the `Settings` key/value table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub name: String,
    pub value: String,
}

/// Runtime settings consulted by the data access layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemSettings {
    pub default_membership_group_id: i64,
    /// Minutes of inactivity after which an online member counts as offline.
    pub user_timeout_minutes: i64,
    pub profile_with_avatar_set: bool,
    pub reveal_login_failure_reason: bool,
}

impl From<&SystemConfig> for SystemSettings {
    fn from(config: &SystemConfig) -> Self {
        Self {
            default_membership_group_id: config.default_membership_group_id,
            user_timeout_minutes: config.user_timeout_minutes,
            profile_with_avatar_set: config.profile_with_avatar_set,
            reveal_login_failure_reason: config.reveal_login_failure_reason,
        }
    }
}

impl SystemSettings {
    /// Overlays stored rows on the configured fallbacks.
    pub fn from_settings(settings: &[SystemSetting], fallback: &SystemConfig) -> Self {
        let mut config = SystemSettings::from(fallback);

        for setting in settings {
            match setting.name.as_str() {
                "defaultMembershipGroupId" => {
                    config.default_membership_group_id = setting
                        .value
                        .parse()
                        .unwrap_or(fallback.default_membership_group_id);
                }
                "userTimeout" => {
                    config.user_timeout_minutes =
                        setting.value.parse().unwrap_or(fallback.user_timeout_minutes);
                }
                "profileWithAvatarSet" => {
                    config.profile_with_avatar_set =
                        parse_flag(&setting.value).unwrap_or(fallback.profile_with_avatar_set);
                }
                "revealLoginFailureReason" => {
                    config.reveal_login_failure_reason =
                        parse_flag(&setting.value).unwrap_or(fallback.reveal_login_failure_reason);
                }
                _ => {}
            }
        }

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(name: &str, value: &str) -> SystemSetting {
        SystemSetting { name: name.to_string(), value: value.to_string() }
    }

    #[test]
    fn test_from_settings_overlays_fallback() {
        let fallback = SystemConfig::default();
        let settings = SystemSettings::from_settings(
            &[
                setting("defaultMembershipGroupId", "4"),
                setting("userTimeout", "not-a-number"),
                setting("profileWithAvatarSet", "1"),
                setting("unrelated", "x"),
            ],
            &fallback,
        );
        assert_eq!(settings.default_membership_group_id, 4);
        assert_eq!(settings.user_timeout_minutes, fallback.user_timeout_minutes);
        assert!(settings.profile_with_avatar_set);
        assert!(settings.reveal_login_failure_reason);
    }
}
