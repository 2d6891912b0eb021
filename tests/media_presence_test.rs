mod common;

use chrono::Duration;
use udal::{
    domain::*,
    error::AppError,
    repository::{MediaRepository, MemberRepository, PresenceRepository},
};

use common::{new_member, setup};

#[tokio::test]
async fn test_avatar_round_trip() -> anyhow::Result<()> {
    let app = setup().await?;
    let media = &app.services.media_repo;
    let profile_id = app.services.member_repo.add(new_member("a@b.c", "alice")).await?;

    media.set_avatar(profile_id, Some("alice.jpg"), true).await?;
    let avatar = media.get_avatar(profile_id, None).await?;
    assert_eq!(avatar.pic.as_deref(), Some("alice.jpg"));
    assert!(avatar.approved);

    // Waiting for moderation: the approved-only view no longer matches
    media.set_avatar(profile_id, Some("new.jpg"), false).await?;
    assert!(media.get_avatar(profile_id, Some(true)).await.unwrap_err().is_not_found());
    assert_eq!(media.get_avatar(profile_id, Some(false)).await?.pic.as_deref(), Some("new.jpg"));

    media.delete_avatar(profile_id).await?;
    let avatar = media.get_avatar(profile_id, None).await?;
    assert_eq!(avatar.pic, None);
    assert!(avatar.approved);
    assert_eq!(
        app.services.member_repo.get_field(profile_id, MemberField::Avatar, Realm::Members).await?,
        FieldValue::Null
    );

    assert!(media.set_avatar(999, Some("x.jpg"), true).await.unwrap_err().is_not_found());

    Ok(())
}

#[tokio::test]
async fn test_background() -> anyhow::Result<()> {
    let app = setup().await?;
    let media = &app.services.media_repo;
    let profile_id = app.services.member_repo.add(new_member("a@b.c", "alice")).await?;

    assert_eq!(media.get_background(profile_id, None).await?, None);

    media.add_background(profile_id, "bg.png", false).await?;
    let background = media.get_background(profile_id, None).await?;
    assert_eq!(background, Some(Background { file: "bg.png".to_string(), approved: false }));
    assert_eq!(media.get_background(profile_id, Some(true)).await?, None);
    assert_eq!(
        app.services.member_repo.get_field(profile_id, MemberField::Background, Realm::Members).await?,
        FieldValue::Text("bg.png".to_string())
    );

    // One background per member
    let err = media.add_background(profile_id, "other.png", true).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    media.delete_background(profile_id).await?;
    assert_eq!(media.get_background(profile_id, None).await?, None);

    Ok(())
}

#[tokio::test]
async fn test_presence() -> anyhow::Result<()> {
    let app = setup().await?;
    let presence = &app.services.presence_repo;
    let profile_id = app.services.member_repo.add(new_member("a@b.c", "alice")).await?;

    assert_eq!(presence.get_user_status(profile_id).await?, UserStatus::Offline);

    presence.set_user_status(profile_id, UserStatus::Online).await?;
    app.services.member_repo.set_last_activity(profile_id, Realm::Members).await?;
    assert_eq!(presence.get_user_status(profile_id).await?, UserStatus::Online);
    assert!(presence.is_online(profile_id, 1).await?);

    app.clock.advance(Duration::minutes(2));
    assert!(!presence.is_online(profile_id, 1).await?);
    assert!(presence.is_online(profile_id, 5).await?);
    // No window reaches past the start of the calendar
    assert!(!presence.is_online(profile_id, i64::MAX).await?);

    presence.set_user_status(profile_id, UserStatus::Busy).await?;
    assert_eq!(presence.get_user_status(profile_id).await?, UserStatus::Busy);
    assert!(!presence.is_online(profile_id, 5).await?);

    assert!(presence.get_user_status(999).await.unwrap_err().is_not_found());
    assert!(presence.set_user_status(999, UserStatus::Away).await.unwrap_err().is_not_found());

    Ok(())
}
