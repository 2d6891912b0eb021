mod common;

use udal::service::settings_service::SettingsProvider;

use common::setup;

#[tokio::test]
async fn test_settings_overlay_configured_defaults() -> anyhow::Result<()> {
    let app = setup().await?;
    let settings = &app.services.settings_service;

    let all = settings.get_all_settings().await?;
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].name, "defaultMembershipGroupId");

    let system = settings.system_settings().await?;
    assert_eq!(system.user_timeout_minutes, 1);
    assert!(system.reveal_login_failure_reason);

    settings.update_setting("userTimeout", "15").await?;
    settings.update_setting("revealLoginFailureReason", "0").await?;
    let system = settings.system_settings().await?;
    assert_eq!(system.user_timeout_minutes, 15);
    assert!(!system.reveal_login_failure_reason);

    // Unreadable values fall back to configuration
    settings.update_setting("userTimeout", "soon").await?;
    assert_eq!(settings.system_settings().await?.user_timeout_minutes, 1);

    assert!(settings.get_setting("missing").await.unwrap_err().is_not_found());
    assert!(settings.update_setting("missing", "1").await.unwrap_err().is_not_found());

    Ok(())
}
