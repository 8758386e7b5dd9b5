// Session types

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settings for a [`super::SessionManager`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Backend base URL; relative request targets resolve against it
    pub api_base_url: Url,

    /// Path of the credential-refresh endpoint
    pub refresh_path: String,

    /// Login entry point used for redirects after teardown
    pub login_url: String,

    /// Stale buffer in seconds (default: 300 = 5 minutes)
    pub refresh_threshold: i64,

    /// Treat a missing expiry as stale instead of valid
    pub strict_expiry: bool,

    /// HTTP connect timeout in seconds
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    pub request_timeout: u64,
}

impl SessionSettings {
    /// Settings with defaults for everything but the base URL
    pub fn new(api_base_url: Url) -> Self {
        let login_url = api_base_url
            .join("/login")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| api_base_url.to_string());

        Self {
            api_base_url,
            refresh_path: "/api/auth/refresh".to_string(),
            login_url,
            refresh_threshold: 300,
            strict_expiry: false,
            connect_timeout: 30,
            request_timeout: 60,
        }
    }
}

/// Backend user identifier, numeric or textual
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

/// Last known user snapshot from the backend, cached for display only
///
/// Every field is optional, so an incomplete profile never fails a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    /// Remaining profile fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Credential grant returned by the refresh endpoint (and by login)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub user: Option<UserProfile>,
}

/// Fully resolved credential set, ready to be written to the store
#[derive(Debug, Clone, PartialEq)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: Option<UserProfile>,
}

/// Stored expiry as read back from the key-value store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Missing,
    At(i64),
    Unparseable,
}

impl Expiry {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => Expiry::Missing,
            Some(s) => s
                .trim()
                .parse::<i64>()
                .map(Expiry::At)
                .unwrap_or(Expiry::Unparseable),
        }
    }
}

/// Consistent snapshot of the stored session
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Expiry,
    pub user: Option<String>,
}

impl StoredSession {
    /// Both credentials, or nothing
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some((access.as_str(), refresh.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_parse() {
        assert_eq!(Expiry::parse(None), Expiry::Missing);
        assert_eq!(Expiry::parse(Some("1700000000")), Expiry::At(1_700_000_000));
        assert_eq!(Expiry::parse(Some(" 42 ")), Expiry::At(42));
        assert_eq!(Expiry::parse(Some("tomorrow")), Expiry::Unparseable);
        assert_eq!(Expiry::parse(Some("")), Expiry::Unparseable);
    }

    #[test]
    fn test_partial_pair_has_no_credentials() {
        let session = StoredSession {
            access_token: Some("A1".to_string()),
            refresh_token: None,
            expires_at: Expiry::Missing,
            user: None,
        };
        assert!(session.credentials().is_none());

        let session = StoredSession {
            refresh_token: Some("R1".to_string()),
            ..session
        };
        assert_eq!(session.credentials(), Some(("A1", "R1")));
    }

    #[test]
    fn test_user_profile_keeps_extra_fields() {
        let profile: UserProfile = serde_json::from_value(json!({
            "id": 17,
            "email": "sales@northside-motors.com",
            "role": "admin",
            "tier": "pro",
            "dealership": "Northside Motors"
        }))
        .unwrap();

        assert_eq!(profile.id, Some(UserId::Number(17)));
        assert_eq!(profile.id.as_ref().unwrap().to_string(), "17");
        assert_eq!(profile.role.as_deref(), Some("admin"));
        assert_eq!(profile.extra["dealership"], "Northside Motors");

        let back = serde_json::to_value(&profile).unwrap();
        assert_eq!(back["dealership"], "Northside Motors");
        assert_eq!(back["tier"], "pro");
    }

    #[test]
    fn test_user_profile_text_id_and_missing_fields() {
        let profile: UserProfile =
            serde_json::from_value(json!({ "id": "usr_9f2" })).unwrap();
        assert_eq!(profile.id, Some(UserId::Text("usr_9f2".to_string())));
        assert!(profile.email.is_none());
        assert!(profile.role.is_none());
    }

    #[test]
    fn test_user_profile_without_id() {
        let profile: UserProfile =
            serde_json::from_value(json!({ "email": "bdc@metro-ford.com", "tier": "pro" }))
                .unwrap();
        assert!(profile.id.is_none());
        assert_eq!(profile.email.as_deref(), Some("bdc@metro-ford.com"));

        let back = serde_json::to_value(&profile).unwrap();
        assert!(back.get("id").is_none());
    }

    #[test]
    fn test_grant_optional_fields() {
        let grant: SessionGrant =
            serde_json::from_value(json!({ "access_token": "A2" })).unwrap();
        assert_eq!(grant.access_token, "A2");
        assert!(grant.refresh_token.is_none());
        assert!(grant.expires_at.is_none());
        assert!(grant.user.is_none());
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::new(Url::parse("https://api.example.com").unwrap());
        assert_eq!(settings.refresh_path, "/api/auth/refresh");
        assert_eq!(settings.login_url, "https://api.example.com/login");
        assert_eq!(settings.refresh_threshold, 300);
        assert!(!settings.strict_expiry);
    }
}
