use chrono::{NaiveDate, NaiveDateTime};
use sqlx::FromRow;

use crate::{
    db::to_utc,
    domain::{
        parse_match_sex, ActiveState, Member, MemberInfo, MemberPrivacy, MemberProfile,
        Membership, Permissions, PrivacyProfile, Sex, UserStatus,
    },
    error::{AppError, Result},
};

/// Identity columns, qualified with the `m` alias. The password is never selected.
pub(crate) const MEMBER_COLUMNS: &str = "m.profileId, m.email, m.username, m.firstName, m.lastName, \
    m.sex, m.matchSex, m.birthDate, m.active, m.userStatus, m.groupId, m.membershipDate, m.joinDate, \
    m.lastActivity, m.lastEdit, m.ip, m.hashValidation, m.avatar, m.approvedAvatar, m.ban, m.views, m.votes";

/// Info columns (`i` alias) followed by privacy columns (`p` alias).
pub(crate) const PROFILE_COLUMNS: &str = "i.middleName, i.country, i.city, i.state, i.zipCode, \
    i.description, i.website, i.socialNetworkSite, i.height, i.weight, \
    p.privacyProfile, p.searchProfile, p.userSaveViews";

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
pub(crate) struct MemberRow {
    profile_id: i64,
    email: String,
    username: String,
    first_name: Option<String>,
    last_name: Option<String>,
    sex: String,
    match_sex: String,
    birth_date: Option<NaiveDate>,
    active: i64,
    user_status: i64,
    group_id: i64,
    membership_date: Option<NaiveDateTime>,
    join_date: Option<NaiveDateTime>,
    last_activity: Option<NaiveDateTime>,
    last_edit: Option<NaiveDateTime>,
    ip: String,
    hash_validation: Option<String>,
    avatar: Option<String>,
    approved_avatar: i64,
    ban: i64,
    views: i64,
    votes: i64,
}

impl TryFrom<MemberRow> for Member {
    type Error = AppError;

    fn try_from(row: MemberRow) -> Result<Self> {
        Ok(Member {
            profile_id: row.profile_id,
            email: row.email,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            sex: parse_sex(&row.sex)?,
            match_sex: parse_match_sex(&row.match_sex),
            birth_date: row.birth_date,
            active: ActiveState::from_i64(row.active)
                .ok_or_else(|| AppError::Database(format!("Invalid active state: {}", row.active)))?,
            user_status: parse_user_status(row.user_status)?,
            group_id: row.group_id,
            membership_date: row.membership_date.map(to_utc),
            join_date: row.join_date.map(to_utc),
            last_activity: row.last_activity.map(to_utc),
            last_edit: row.last_edit.map(to_utc),
            ip: row.ip,
            hash_validation: row.hash_validation,
            avatar: row.avatar,
            approved_avatar: row.approved_avatar != 0,
            ban: row.ban != 0,
            views: row.views,
            votes: row.votes,
        })
    }
}

pub(crate) fn parse_sex(s: &str) -> Result<Sex> {
    Sex::from_str(s).ok_or_else(|| AppError::Database(format!("Invalid sex: {}", s)))
}

pub(crate) fn parse_user_status(value: i64) -> Result<UserStatus> {
    UserStatus::from_i64(value).ok_or_else(|| AppError::Database(format!("Invalid user status: {}", value)))
}

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
pub(crate) struct InfoRow {
    middle_name: String,
    country: String,
    city: String,
    state: String,
    zip_code: String,
    description: String,
    website: String,
    social_network_site: String,
    height: Option<i64>,
    weight: Option<i64>,
}

impl From<InfoRow> for MemberInfo {
    fn from(row: InfoRow) -> Self {
        MemberInfo {
            middle_name: row.middle_name,
            country: row.country,
            city: row.city,
            state: row.state,
            zip_code: row.zip_code,
            description: row.description,
            website: row.website,
            social_network_site: row.social_network_site,
            height: row.height,
            weight: row.weight,
        }
    }
}

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
pub(crate) struct PrivacyRow {
    privacy_profile: String,
    search_profile: String,
    user_save_views: String,
}

impl TryFrom<PrivacyRow> for MemberPrivacy {
    type Error = AppError;

    fn try_from(row: PrivacyRow) -> Result<Self> {
        Ok(MemberPrivacy {
            privacy_profile: PrivacyProfile::from_str(&row.privacy_profile).ok_or_else(|| {
                AppError::Database(format!("Invalid privacy profile: {}", row.privacy_profile))
            })?,
            search_profile: row.search_profile == "yes",
            user_save_views: row.user_save_views == "yes",
        })
    }
}

/// A member joined with its info and privacy rows. Side columns are
/// nullable because both joins are outer joins.
#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
pub(crate) struct ProfileRow {
    #[sqlx(flatten)]
    member: MemberRow,
    middle_name: Option<String>,
    country: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
    description: Option<String>,
    website: Option<String>,
    social_network_site: Option<String>,
    height: Option<i64>,
    weight: Option<i64>,
    privacy_profile: Option<String>,
    search_profile: Option<String>,
    user_save_views: Option<String>,
}

impl TryFrom<ProfileRow> for MemberProfile {
    type Error = AppError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        let privacy = match (row.privacy_profile, row.search_profile, row.user_save_views) {
            (Some(privacy_profile), Some(search_profile), Some(user_save_views)) => {
                MemberPrivacy::try_from(PrivacyRow {
                    privacy_profile,
                    search_profile,
                    user_save_views,
                })?
            }
            _ => MemberPrivacy::default(),
        };

        Ok(MemberProfile {
            member: Member::try_from(row.member)?,
            info: MemberInfo {
                middle_name: row.middle_name.unwrap_or_default(),
                country: row.country.unwrap_or_default(),
                city: row.city.unwrap_or_default(),
                state: row.state.unwrap_or_default(),
                zip_code: row.zip_code.unwrap_or_default(),
                description: row.description.unwrap_or_default(),
                website: row.website.unwrap_or_default(),
                social_network_site: row.social_network_site.unwrap_or_default(),
                height: row.height,
                weight: row.weight,
            },
            privacy,
        })
    }
}

#[derive(FromRow)]
#[sqlx(rename_all = "camelCase")]
pub(crate) struct MembershipRow {
    group_id: i64,
    name: String,
    description: String,
    permissions: String,
    price: f64,
    expiration_days: i64,
    enable: i64,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = AppError;

    fn try_from(row: MembershipRow) -> Result<Self> {
        Ok(Membership {
            group_id: row.group_id,
            name: row.name,
            description: row.description,
            permissions: Permissions::from_blob(&row.permissions)?,
            price: row.price,
            expiration_days: row.expiration_days,
            enable: row.enable != 0,
        })
    }
}

pub(crate) fn rows_into<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}
