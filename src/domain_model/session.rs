use crate::domain_model::UserId;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The principal an access token was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Credential bundle issued by the auth provider.
///
/// Serialized as-is into persistent storage, so field names follow the
/// provider's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    /// Unix seconds. Filled from `expires_in` when the provider omits it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn subject(&self) -> UserId {
        self.user.id
    }

    /// Pins `expires_at` relative to `now` if the provider only sent `expires_in`.
    pub fn with_expiry_from(mut self, now: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(now.timestamp() + self.expires_in);
        }
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// True when the access token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at() {
            Some(at) => at - margin <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<i64>) -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_type: "bearer".into(),
            expires_in: 3600,
            expires_at,
            user: AuthUser {
                id: UserId::nil(),
                email: None,
            },
        }
    }

    #[test]
    fn expiry_is_pinned_from_expires_in() {
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let s = session(None).with_expiry_from(now);
        assert_eq!(s.expires_at, Some(4_600));

        let kept = session(Some(10)).with_expiry_from(now);
        assert_eq!(kept.expires_at, Some(10));
    }

    #[test]
    fn expires_within_margin() {
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let s = session(Some(1_030));
        assert!(s.expires_within(now, Duration::seconds(60)));
        assert!(!s.expires_within(now, Duration::seconds(10)));
        assert!(!session(None).expires_within(now, Duration::seconds(60)));
    }

    #[test]
    fn deserializes_provider_payload_without_optional_fields() {
        let raw = r#"{
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": {"id": "00000000-0000-0000-0000-000000000000"}
        }"#;
        let s: Session = serde_json::from_str(raw).unwrap();
        assert_eq!(s.token_type, "bearer");
        assert_eq!(s.expires_at, None);
        assert_eq!(s.user.email, None);
    }
}
