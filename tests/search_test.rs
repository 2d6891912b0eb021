mod common;

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use udal::{
    auth::{MemorySessionStore, SessionStore, SESSION_MEMBER_ID_KEY},
    domain::*,
    error::AppError,
    repository::{MemberRepository, MembershipRepository, PresenceRepository, SearchRepository},
};

use common::{new_member, setup, TestApp};

const PAGE: SearchMode = SearchMode::Page { offset: 0, limit: 10 };

/// A 30 year old man and a 25 year old woman, both in France.
async fn two_members(app: &TestApp) -> anyhow::Result<(i64, i64)> {
    let repo = &app.services.member_repo;

    let mut male = new_member("max@example.com", "max");
    male.sex = Sex::Male;
    male.match_sex = vec![Sex::Female];
    male.birth_date = NaiveDate::from_ymd_opt(1994, 1, 10);
    male.city = Some("Saint Etienne".to_string());
    let male_id = repo.add(male).await?;

    let mut female = new_member("zoe@example.com", "zoe");
    female.birth_date = NaiveDate::from_ymd_opt(1999, 3, 2);
    let female_id = repo.add(female).await?;

    Ok((male_id, female_id))
}

fn usernames(result: SearchResult) -> Vec<String> {
    result.into_rows().into_iter().map(|p| p.member.username).collect()
}

#[tokio::test]
async fn test_search_by_sex_and_country() -> anyhow::Result<()> {
    let app = setup().await?;
    two_members(&app).await?;

    let query = SearchQuery {
        sex: vec![Sex::Male],
        country: Some("FR".to_string()),
        ..Default::default()
    };
    let result = app.services.search_repo.search(&query, PAGE).await?;
    assert_eq!(usernames(result), vec!["max".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_count_matches_rows() -> anyhow::Result<()> {
    let app = setup().await?;
    two_members(&app).await?;
    let search = &app.services.search_repo;

    let queries = [
        SearchQuery::default(),
        SearchQuery { country: Some("FR".to_string()), ..Default::default() },
        SearchQuery { sex: vec![Sex::Female, Sex::Couple], ..Default::default() },
        SearchQuery { age: Some(30), ..Default::default() },
        SearchQuery { min_age: Some(20), max_age: Some(26), ..Default::default() },
        SearchQuery { city: Some("saint-etienne".to_string()), ..Default::default() },
        SearchQuery { country: Some("DE".to_string()), ..Default::default() },
    ];

    for query in &queries {
        let count = search.search(query, SearchMode::Count).await?.count();
        let rows = search.search(query, PAGE).await?;
        assert_eq!(count, rows.count(), "{:?}", query);
        // Same predicates, same answer
        assert_eq!(count, search.search(query, SearchMode::Count).await?.count());
    }

    let by_age = SearchQuery { age: Some(30), ..Default::default() };
    assert_eq!(usernames(search.search(&by_age, PAGE).await?), vec!["max".to_string()]);

    let by_range = SearchQuery { min_age: Some(20), max_age: Some(26), ..Default::default() };
    assert_eq!(usernames(search.search(&by_range, PAGE).await?), vec!["zoe".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_email_search_ignores_demographics() -> anyhow::Result<()> {
    let app = setup().await?;
    let (_, female_id) = two_members(&app).await?;
    // The actor is not excluded from an email lookup
    app.session.set(SESSION_MEMBER_ID_KEY, &female_id.to_string());

    let query = SearchQuery {
        email: Some("zoe@".to_string()),
        sex: vec![Sex::Male],
        country: Some("US".to_string()),
        ..Default::default()
    };
    let result = app.services.search_repo.search(&query, PAGE).await?;
    assert_eq!(usernames(result), vec!["zoe".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_actor_is_excluded() -> anyhow::Result<()> {
    let app = setup().await?;
    let (male_id, _) = two_members(&app).await?;
    app.session.set(SESSION_MEMBER_ID_KEY, &male_id.to_string());

    let result = app.services.search_repo.search(&SearchQuery::default(), PAGE).await?;
    assert_eq!(usernames(result), vec!["zoe".to_string()]);

    let profiles = app.services.search_repo.get_profiles(SearchOrder::Latest, None).await?;
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].member.username, "zoe");

    Ok(())
}

#[tokio::test]
async fn test_online_filter_respects_timeout() -> anyhow::Result<()> {
    let app = setup().await?;
    let (male_id, _) = two_members(&app).await?;
    app.services.presence_repo.set_user_status(male_id, UserStatus::Online).await?;
    app.services.member_repo.set_last_activity(male_id, Realm::Members).await?;

    let online = SearchQuery { online: true, ..Default::default() };
    let search = &app.services.search_repo;
    assert_eq!(usernames(search.search(&online, PAGE).await?), vec!["max".to_string()]);

    app.clock.advance(Duration::minutes(2));
    assert_eq!(search.search(&online, SearchMode::Count).await?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_hidden_members_never_match() -> anyhow::Result<()> {
    let app = setup().await?;
    let (male_id, female_id) = two_members(&app).await?;

    app.services
        .membership_repo
        .update_membership(PENDING_GROUP_ID, male_id, None)
        .await?;
    let private = MemberPrivacy { search_profile: false, ..Default::default() };
    app.services.member_repo.update_privacy_setting(female_id, &private).await?;

    let search = &app.services.search_repo;
    assert_eq!(search.search(&SearchQuery::default(), SearchMode::Count).await?.count(), 0);
    assert!(search.get_profiles(SearchOrder::Latest, None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_order_and_pagination() -> anyhow::Result<()> {
    let app = setup().await?;
    two_members(&app).await?;
    let search = &app.services.search_repo;

    let by_name = SearchQuery {
        order: Some(SearchOrder::Username),
        sort: Some(SortDirection::Desc),
        ..Default::default()
    };
    assert_eq!(
        usernames(search.search(&by_name, PAGE).await?),
        vec!["zoe".to_string(), "max".to_string()]
    );
    assert_eq!(
        usernames(search.search(&by_name, SearchMode::Page { offset: 1, limit: 1 }).await?),
        vec!["max".to_string()]
    );

    let err = search
        .search(&by_name, SearchMode::Page { offset: 0, limit: -1 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));

    Ok(())
}

#[tokio::test]
async fn test_geo_profiles() -> anyhow::Result<()> {
    let app = setup().await?;
    two_members(&app).await?;
    let search = &app.services.search_repo;

    let count = search
        .get_geo_profiles("FR", None, SearchMode::Count, SearchOrder::Latest)
        .await?;
    assert_eq!(count.count(), 2);

    let paris = search
        .get_geo_profiles("FR", Some("Par"), PAGE, SearchOrder::Latest)
        .await?;
    assert_eq!(usernames(paris), vec!["zoe".to_string()]);

    let elsewhere = search
        .get_geo_profiles("US", None, SearchMode::Count, SearchOrder::Latest)
        .await?;
    assert_eq!(elsewhere.count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_listings_skip_incomplete_profiles() -> anyhow::Result<()> {
    let app = setup().await?;
    let mut nameless = new_member("anon@example.com", "anon");
    nameless.first_name = None;
    app.services.member_repo.add(nameless).await?;
    let search = &app.services.search_repo;

    assert!(search.get_profiles(SearchOrder::Latest, None).await?.is_empty());
    let count = search
        .get_geo_profiles("FR", None, SearchMode::Count, SearchOrder::Latest)
        .await?;
    assert_eq!(count.count(), 0);
    let rows = search.get_geo_profiles("FR", None, PAGE, SearchOrder::Latest).await?;
    assert_eq!(rows.count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_each_session_excludes_its_own_member() -> anyhow::Result<()> {
    let app = setup().await?;
    let (male_id, female_id) = two_members(&app).await?;

    let his = Arc::new(MemorySessionStore::for_member(male_id));
    let hers = Arc::new(MemorySessionStore::for_member(female_id));
    let as_him = app.services.for_session(his);
    let as_her = app.services.for_session(hers);

    let query = SearchQuery::default();
    assert_eq!(usernames(as_him.search_repo.search(&query, PAGE).await?), vec!["zoe".to_string()]);
    assert_eq!(usernames(as_her.search_repo.search(&query, PAGE).await?), vec!["max".to_string()]);
    // The shared context stays anonymous
    assert_eq!(app.services.search_repo.search(&query, SearchMode::Count).await?.count(), 2);

    Ok(())
}
