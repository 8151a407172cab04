use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Canonical storage key for the cached user record.
pub const USER_KEY: &str = "auth.user";

/// Alias written alongside [`USER_KEY`] for older readers of the same storage.
pub const LEGACY_USER_KEY: &str = "userData";

const ID_FIELDS: [&str; 4] = ["id", "user_id", "userId", "uid"];
const NAME_FIELDS: [&str; 4] = ["displayName", "display_name", "name", "username"];
const AVATAR_FIELDS: [&str; 4] = ["avatarUrl", "avatar_url", "avatar", "picture"];

/// Profile of an authenticated visitor.
///
/// Only `id` is required. Fields the bridge does not interpret are kept in
/// `extra` and written back out untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: Some(display_name.into()),
            avatar_url: None,
            extra: Map::new(),
        }
    }

    /// Accepts any of the field spellings the primary and legacy endpoints use.
    /// Returns `None` for non-objects and for records without a usable id.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };

        let id = take_first(&mut fields, &ID_FIELDS).and_then(id_string)?;
        let display_name = take_first(&mut fields, &NAME_FIELDS).and_then(non_empty_string);
        let avatar_url = take_first(&mut fields, &AVATAR_FIELDS).and_then(non_empty_string);

        Some(Self {
            id,
            display_name,
            avatar_url,
            extra: fields,
        })
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok().and_then(Self::from_value)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn take_first(fields: &mut Map<String, Value>, names: &[&str]) -> Option<Value> {
    let mut found = None;

    // every alias is removed so none of them leak into `extra`
    for name in names {
        if let Some(value) = fields.remove(*name) {
            if found.is_none() && !value.is_null() {
                found = Some(value);
            }
        }
    }

    found
}

fn id_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty_string(Value::String(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Remote,
    Cache,
}

/// The one fact the bridge maintains: is the visitor signed in, and as whom.
///
/// `authenticated` is true exactly when `user` is present; the constructors
/// are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFact {
    authenticated: bool,
    user: Option<UserRecord>,
    observed_at: DateTime<Utc>,
    source: Source,
}

impl SessionFact {
    pub fn logged_out(source: Source) -> Self {
        Self {
            authenticated: false,
            user: None,
            observed_at: Utc::now(),
            source,
        }
    }

    pub fn logged_in(user: UserRecord, source: Source) -> Self {
        Self {
            authenticated: true,
            user: Some(user),
            observed_at: Utc::now(),
            source,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.id.as_str())
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub(crate) fn observe(&mut self, source: Source) {
        self.observed_at = Utc::now();
        self.source = source;
    }
}

impl Default for SessionFact {
    fn default() -> Self {
        Self::logged_out(Source::Cache)
    }
}

/// Normalized answer from the session oracle.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleResult {
    Authenticated(UserRecord),
    Unauthenticated,
    /// Both endpoints failed. Says nothing about the session.
    Unknown,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_canonical_fields() {
        let user = UserRecord::from_value(json!({
            "id": "42",
            "displayName": "Ada",
            "avatarUrl": "/a.png",
            "tier": "gold"
        }))
        .unwrap();

        assert_eq!(user.id, "42");
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert_eq!(user.avatar_url.as_deref(), Some("/a.png"));
        assert_eq!(user.extra.get("tier"), Some(&json!("gold")));
    }

    #[test]
    fn test_legacy_fields() {
        let user = UserRecord::from_value(json!({
            "user_id": 42,
            "username": "ada",
            "avatar": "/legacy.png"
        }))
        .unwrap();

        assert_eq!(user.id, "42");
        assert_eq!(user.display_name.as_deref(), Some("ada"));
        assert_eq!(user.avatar_url.as_deref(), Some("/legacy.png"));
        assert!(user.extra.is_empty());
    }

    #[test]
    fn test_alias_precedence() {
        let user = UserRecord::from_value(json!({
            "id": 7,
            "name": "second",
            "displayName": "first",
            "avatar": null,
            "picture": "/p.png"
        }))
        .unwrap();

        assert_eq!(user.display_name.as_deref(), Some("first"));
        assert_eq!(user.avatar_url.as_deref(), Some("/p.png"));
        assert!(user.extra.is_empty());
    }

    #[test]
    fn test_missing_or_empty_id() {
        assert!(UserRecord::from_value(json!({ "name": "NoId" })).is_none());
        assert!(UserRecord::from_value(json!({ "id": "  " })).is_none());
        assert!(UserRecord::from_value(json!({ "id": true })).is_none());
        assert!(UserRecord::from_value(json!("42")).is_none());
        assert!(UserRecord::from_value(Value::Null).is_none());
    }

    #[test]
    fn test_json_round_trip_keeps_extra() {
        let mut user = UserRecord::new("42", "Ada");
        user.extra.insert("cart".to_string(), json!(3));

        let json = user.to_json().unwrap();
        assert_eq!(UserRecord::from_json(&json), Some(user));
    }

    #[test]
    fn test_fact_invariant() {
        let fact = SessionFact::logged_in(UserRecord::new("42", "Ada"), Source::Remote);
        assert!(fact.is_authenticated());
        assert_eq!(fact.user_id(), Some("42"));

        let fact = SessionFact::default();
        assert!(!fact.is_authenticated());
        assert!(fact.user().is_none());
    }
}
