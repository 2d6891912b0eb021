use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::{AppError, Result};

/// Group assigned to anonymous sessions.
pub const VISITOR_GROUP_ID: i64 = 1;
/// Accounts waiting for moderation.
pub const PENDING_GROUP_ID: i64 = 9;
/// Groups never shown in listings or searches.
pub const HIDDEN_GROUP_IDS: [i64; 2] = [VISITOR_GROUP_ID, PENDING_GROUP_ID];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: i64,
    pub name: String,
    pub description: String,
    pub permissions: Permissions,
    pub price: f64,
    /// 0 means the membership never expires.
    pub expiration_days: i64,
    pub enable: bool,
}

/// A membership group to create.
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct NewMembership {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub description: String,
    pub permissions: Permissions,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[validate(range(min = 0))]
    pub expiration_days: i64,
    pub enable: bool,
}

/// A single column change on a membership group.
#[derive(Debug, Clone)]
pub enum MembershipChange {
    Name(String),
    Description(String),
    Permissions(Permissions),
    Price(f64),
    ExpirationDays(i64),
    Enable(bool),
}

impl MembershipChange {
    pub fn column(&self) -> &'static str {
        match self {
            MembershipChange::Name(_) => "name",
            MembershipChange::Description(_) => "description",
            MembershipChange::Permissions(_) => "permissions",
            MembershipChange::Price(_) => "price",
            MembershipChange::ExpirationDays(_) => "expirationDays",
            MembershipChange::Enable(_) => "enable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipDetails {
    pub profile_id: i64,
    pub username: String,
    pub group_id: i64,
    pub membership_name: String,
    pub expiration_days: i64,
    pub membership_date: Option<DateTime<Utc>>,
}

impl MembershipDetails {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        membership_active(self.membership_date, self.expiration_days, now)
    }
}

/// A membership is current when it is perpetual or its end is not yet past.
pub fn membership_active(
    membership_date: Option<DateTime<Utc>>,
    expiration_days: i64,
    now: DateTime<Utc>,
) -> bool {
    if expiration_days == 0 {
        return true;
    }
    match membership_date {
        Some(start) => match Duration::try_days(expiration_days).and_then(|d| start.checked_add_signed(d)) {
            Some(end) => end >= now,
            // Past the end of the calendar
            None => expiration_days > 0,
        },
        None => false,
    }
}

/// Capabilities granted to a membership group.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Permissions {
    #[serde(deserialize_with = "flag")]
    pub quick_search_profiles: bool,
    #[serde(deserialize_with = "flag")]
    pub advanced_search_profiles: bool,
    #[serde(deserialize_with = "flag")]
    pub view_profiles: bool,
    #[serde(deserialize_with = "flag")]
    pub read_mails: bool,
    #[serde(deserialize_with = "flag")]
    pub write_mails: bool,
    #[serde(deserialize_with = "flag")]
    pub view_pictures: bool,
    #[serde(deserialize_with = "flag")]
    pub upload_pictures: bool,
    #[serde(deserialize_with = "flag")]
    pub view_videos: bool,
    #[serde(deserialize_with = "flag")]
    pub upload_videos: bool,
    #[serde(deserialize_with = "flag")]
    pub instant_messaging: bool,
    #[serde(deserialize_with = "flag")]
    pub forum_access: bool,
    #[serde(deserialize_with = "flag")]
    pub create_forum_topics: bool,
    #[serde(deserialize_with = "flag")]
    pub answer_forum_topics: bool,
    #[serde(deserialize_with = "flag")]
    pub games_access: bool,
    #[serde(deserialize_with = "flag")]
    pub hot_or_not: bool,
    #[serde(deserialize_with = "flag")]
    pub love_calculator: bool,
    #[serde(deserialize_with = "flag")]
    pub read_notes: bool,
    #[serde(deserialize_with = "flag")]
    pub write_notes: bool,
    #[serde(deserialize_with = "flag")]
    pub write_comments: bool,
    #[serde(deserialize_with = "flag")]
    pub read_blog_posts: bool,
    #[serde(deserialize_with = "flag")]
    pub write_blog_posts: bool,
    /// Keys this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(is_granted(&Value::deserialize(deserializer)?))
}

fn is_granted(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

impl Permissions {
    /// Decodes the stored `permissions` column.
    ///
    /// JSON objects are the current encoding. Rows written by the legacy
    /// application hold a PHP `serialize()`d associative array instead.
    pub fn from_blob(blob: &str) -> Result<Self> {
        let trimmed = blob.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let map = if trimmed.starts_with('{') {
            serde_json::from_str::<Map<String, Value>>(trimmed)?
        } else {
            parse_php_array(trimmed)?
        };
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    pub fn to_blob(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Minimal reader for `a:N:{k;v;...}` with string/int/bool/null scalars.
fn parse_php_array(input: &str) -> Result<Map<String, Value>> {
    let mut reader = PhpReader { input: input.as_bytes(), pos: 0 };
    match reader.value()? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Internal("Permissions blob is not an array".to_string())),
    }
}

struct PhpReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> PhpReader<'a> {
    fn error(&self, what: &str) -> AppError {
        AppError::Internal(format!("Malformed permissions blob at byte {}: {}", self.pos, what))
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn read_until(&mut self, stop: u8) -> Result<&'a str> {
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != stop {
            self.pos += 1;
        }
        if self.pos >= self.input.len() {
            return Err(self.error("unexpected end"));
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid utf-8"))?;
        self.pos += 1;
        Ok(text)
    }

    fn read_int(&mut self, stop: u8) -> Result<i64> {
        self.read_until(stop)?
            .parse()
            .map_err(|_| self.error("invalid integer"))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = usize::try_from(self.read_int(b':')?).map_err(|_| self.error("negative string length"))?;
        self.expect(b'"')?;
        let end = self.pos.checked_add(len).ok_or_else(|| self.error("string overruns input"))?;
        let bytes = self.input.get(self.pos..end).ok_or_else(|| self.error("string overruns input"))?;
        let text = std::str::from_utf8(bytes).map_err(|_| self.error("invalid utf-8"))?.to_string();
        self.pos = end;
        self.expect(b'"')?;
        self.expect(b';')?;
        Ok(text)
    }

    fn value(&mut self) -> Result<Value> {
        let tag = *self.input.get(self.pos).ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        match tag {
            b'N' => {
                self.expect(b';')?;
                Ok(Value::Null)
            }
            b'b' => {
                self.expect(b':')?;
                Ok(Value::Bool(self.read_int(b';')? != 0))
            }
            b'i' => {
                self.expect(b':')?;
                Ok(Value::from(self.read_int(b';')?))
            }
            b's' => {
                self.expect(b':')?;
                Ok(Value::String(self.read_string()?))
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.read_int(b':')?;
                self.expect(b'{')?;
                let mut map = Map::new();
                for _ in 0..count {
                    let key = match self.value()? {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        _ => return Err(self.error("unsupported array key")),
                    };
                    let value = self.value()?;
                    map.insert(key, value);
                }
                self.expect(b'}')?;
                Ok(Value::Object(map))
            }
            _ => Err(self.error("unsupported type tag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_permissions_from_json() {
        let perms = Permissions::from_blob(
            r#"{"quick_search_profiles":"1","view_profiles":true,"forum_access":0,"beta_feature":"1"}"#,
        )
        .unwrap();
        assert!(perms.quick_search_profiles);
        assert!(perms.view_profiles);
        assert!(!perms.forum_access);
        assert!(!perms.write_mails);
        assert_eq!(perms.extra.get("beta_feature"), Some(&Value::String("1".to_string())));
    }

    #[test]
    fn test_permissions_from_legacy_php_blob() {
        let blob = r#"a:3:{s:21:"quick_search_profiles";s:1:"1";s:10:"read_mails";s:1:"0";s:12:"games_access";i:1;}"#;
        let perms = Permissions::from_blob(blob).unwrap();
        assert!(perms.quick_search_profiles);
        assert!(!perms.read_mails);
        assert!(perms.games_access);
    }

    #[test]
    fn test_permissions_round_trip_through_json() {
        let perms = Permissions { write_notes: true, ..Default::default() };
        let decoded = Permissions::from_blob(&perms.to_blob().unwrap()).unwrap();
        assert_eq!(decoded, perms);
    }

    #[test]
    fn test_malformed_blob_is_rejected() {
        assert!(Permissions::from_blob(r#"a:1:{s:99:"short";s:1:"1";}"#).is_err());
        assert!(Permissions::from_blob("O:8:\"stdClass\":0:{}").is_err());
        assert_eq!(Permissions::from_blob("").unwrap(), Permissions::default());
    }

    #[test]
    fn test_corrupt_string_length_is_an_error() {
        assert!(Permissions::from_blob(r#"a:1:{s:-1:"x";s:1:"1";}"#).is_err());
        let huge = format!(r#"a:1:{{s:{}:"x";s:1:"1";}}"#, i64::MAX);
        assert!(Permissions::from_blob(&huge).is_err());
    }

    #[test]
    fn test_membership_expiration_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(membership_active(Some(start), 30, start + Duration::days(30)));
        assert!(!membership_active(Some(start), 30, start + Duration::days(30) + Duration::seconds(1)));
        assert!(!membership_active(None, 30, start));
    }

    #[test]
    fn test_expiration_beyond_the_calendar() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(membership_active(Some(start), i64::MAX, start));
        assert!(!membership_active(Some(start), i64::MIN, start));
    }

    proptest! {
        #[test]
        fn prop_perpetual_membership_never_expires(
            start_secs in proptest::option::of(0i64..4_000_000_000),
            now_secs in 0i64..4_000_000_000,
        ) {
            let start = start_secs.and_then(|s| Utc.timestamp_opt(s, 0).single());
            let now = Utc.timestamp_opt(now_secs, 0).single().unwrap();
            prop_assert!(membership_active(start, 0, now));
        }
    }
}
