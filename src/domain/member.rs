use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub profile_id: i64,
    pub email: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub sex: Sex,
    pub match_sex: Vec<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub active: ActiveState,
    pub user_status: UserStatus,
    pub group_id: i64,
    pub membership_date: Option<DateTime<Utc>>,
    pub join_date: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_edit: Option<DateTime<Utc>>,
    pub ip: String,
    pub hash_validation: Option<String>,
    pub avatar: Option<String>,
    pub approved_avatar: bool,
    pub ban: bool,
    pub views: i64,
    pub votes: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[default]
    Male,
    Female,
    Couple,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Couple => "couple",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "male" => Some(Sex::Male),
            "female" => Some(Sex::Female),
            "couple" => Some(Sex::Couple),
            _ => None,
        }
    }
}

/// `matchSex` is stored comma-delimited.
pub fn join_match_sex(sexes: &[Sex]) -> String {
    sexes.iter().map(Sex::as_str).collect::<Vec<_>>().join(",")
}

/// Unknown entries are skipped.
pub fn parse_match_sex(s: &str) -> Vec<Sex> {
    s.split(',').filter_map(Sex::from_str).collect()
}

/// Account activation flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActiveState {
    Disabled,
    Active,
    /// Awaiting email confirmation.
    Pending,
}

impl ActiveState {
    pub fn as_i64(&self) -> i64 {
        match self {
            ActiveState::Disabled => 0,
            ActiveState::Active => 1,
            ActiveState::Pending => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ActiveState::Disabled),
            1 => Some(ActiveState::Active),
            2 => Some(ActiveState::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum UserStatus {
    #[default]
    Offline,
    Online,
    Busy,
    Away,
}

impl UserStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            UserStatus::Offline => 0,
            UserStatus::Online => 1,
            UserStatus::Busy => 2,
            UserStatus::Away => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(UserStatus::Offline),
            1 => Some(UserStatus::Online),
            2 => Some(UserStatus::Busy),
            3 => Some(UserStatus::Away),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemberInfo {
    pub middle_name: String,
    pub country: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub description: String,
    pub website: String,
    pub social_network_site: String,
    pub height: Option<i64>,
    pub weight: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PrivacyProfile {
    #[default]
    All,
    Members,
    Friends,
    OnlyMe,
}

impl PrivacyProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyProfile::All => "all",
            PrivacyProfile::Members => "members",
            PrivacyProfile::Friends => "friends",
            PrivacyProfile::OnlyMe => "only_me",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "all" => Some(PrivacyProfile::All),
            "members" => Some(PrivacyProfile::Members),
            "friends" => Some(PrivacyProfile::Friends),
            "only_me" => Some(PrivacyProfile::OnlyMe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberPrivacy {
    pub privacy_profile: PrivacyProfile,
    pub search_profile: bool,
    pub user_save_views: bool,
}

impl Default for MemberPrivacy {
    fn default() -> Self {
        Self {
            privacy_profile: PrivacyProfile::All,
            search_profile: true,
            user_save_views: true,
        }
    }
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberNotification {
    pub enable_newsletters: bool,
    pub new_msg: bool,
    pub friend_request: bool,
}

impl Default for MemberNotification {
    fn default() -> Self {
        Self {
            enable_newsletters: false,
            new_msg: true,
            friend_request: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationFlag {
    EnableNewsletters,
    NewMsg,
    FriendRequest,
}

impl NotificationFlag {
    pub fn column(&self) -> &'static str {
        match self {
            NotificationFlag::EnableNewsletters => "enableNewsletters",
            NotificationFlag::NewMsg => "newMsg",
            NotificationFlag::FriendRequest => "friendRequest",
        }
    }
}

/// Avatar attributes; `pic` is null once the avatar was deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Avatar {
    pub profile_id: i64,
    pub pic: Option<String>,
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Background {
    pub file: String,
    pub approved: bool,
}

/// Member row joined with its info and privacy rows, as listings return it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberProfile {
    pub member: Member,
    pub info: MemberInfo,
    pub privacy: MemberPrivacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernameEntry {
    pub profile_id: i64,
    pub username: String,
    pub sex: Sex,
}

/// Data needed to send an activation email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HashValidation {
    pub email: String,
    pub username: String,
    pub first_name: Option<String>,
    pub hash_validation: Option<String>,
}

/// Single-column projections readable through `get_field`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberField {
    Email,
    Username,
    FirstName,
    LastName,
    Sex,
    MatchSex,
    BirthDate,
    GroupId,
    UserStatus,
    Avatar,
    /// Lives in the background table, read-only here.
    Background,
    Ip,
    Ban,
}

impl MemberField {
    pub fn column(&self) -> &'static str {
        match self {
            MemberField::Email => "email",
            MemberField::Username => "username",
            MemberField::FirstName => "firstName",
            MemberField::LastName => "lastName",
            MemberField::Sex => "sex",
            MemberField::MatchSex => "matchSex",
            MemberField::BirthDate => "birthDate",
            MemberField::GroupId => "groupId",
            MemberField::UserStatus => "userStatus",
            MemberField::Avatar => "avatar",
            MemberField::Background => "file",
            MemberField::Ip => "ip",
            MemberField::Ban => "ban",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, MemberField::GroupId | MemberField::UserStatus | MemberField::Ban)
    }

    pub fn cache_name(&self) -> &'static str {
        match self {
            MemberField::Background => "background",
            other => other.column(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct NewMember {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 40))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub sex: Sex,
    pub match_sex: Vec<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub ip: String,
    #[validate(length(equal = 40))]
    pub hash_validation: Option<String>,
    /// Defaults to active.
    pub active: Option<ActiveState>,
    pub middle_name: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub social_network_site: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_sex_round_trip() {
        let stored = join_match_sex(&[Sex::Male, Sex::Couple]);
        assert_eq!(stored, "male,couple");
        assert_eq!(parse_match_sex(&stored), vec![Sex::Male, Sex::Couple]);
        assert_eq!(parse_match_sex("female,,robot"), vec![Sex::Female]);
        assert!(parse_match_sex("").is_empty());
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(ActiveState::from_i64(2), Some(ActiveState::Pending));
        assert_eq!(ActiveState::Active.as_i64(), 1);
        assert_eq!(ActiveState::from_i64(7), None);
        assert_eq!(UserStatus::from_i64(3), Some(UserStatus::Away));
        assert_eq!(UserStatus::default(), UserStatus::Offline);
    }

    #[test]
    fn test_new_member_validation() {
        let mut member = NewMember {
            email: "a@b.co".to_string(),
            username: "alice".to_string(),
            password: "pw".to_string(),
            ..Default::default()
        };
        assert!(member.validate().is_ok());

        member.hash_validation = Some("short".to_string());
        assert!(member.validate().is_err());

        member.hash_validation = None;
        member.email = "not an email".to_string();
        assert!(member.validate().is_err());
    }
}
