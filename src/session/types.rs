// Session types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IdentityError;

/// The authenticated session: credential pair plus user identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub identity: Value,
    pub issued_at: Option<DateTime<Utc>>,
    /// Advisory only. Expiry is discovered through rejected calls.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Build a session from a login grant
    ///
    /// A login grant must carry both credentials.
    pub fn from_grant(grant: TokenGrant) -> Result<Self, IdentityError> {
        if grant.access_token.is_empty() {
            return Err(IdentityError::InvalidResponse(
                "grant does not contain an access token".to_string(),
            ));
        }

        let refresh_token = grant.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            IdentityError::InvalidResponse("grant does not contain a refresh token".to_string())
        })?;

        let now = Utc::now();
        Ok(Self {
            access_token: grant.access_token,
            refresh_token,
            identity: grant.identity.unwrap_or(Value::Null),
            issued_at: Some(now),
            expires_at: expiry(now, grant.expires_in)?,
        })
    }

    /// Apply a refresh grant, keeping the refresh token and identity when the
    /// grant omits them
    pub fn rotate(&self, grant: TokenGrant) -> Result<Self, IdentityError> {
        if grant.access_token.is_empty() {
            return Err(IdentityError::InvalidResponse(
                "grant does not contain an access token".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.refresh_token.clone()),
            identity: grant.identity.unwrap_or_else(|| self.identity.clone()),
            issued_at: Some(now),
            expires_at: expiry(now, grant.expires_in)?,
        })
    }
}

/// Absolute expiry for a grant's `expires_in`, rejecting values chrono cannot represent
fn expiry(
    now: DateTime<Utc>,
    expires_in: Option<u64>,
) -> Result<Option<DateTime<Utc>>, IdentityError> {
    let Some(secs) = expires_in else {
        return Ok(None);
    };

    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .map(Some)
        .ok_or_else(|| {
            IdentityError::InvalidResponse(format!("grant expiresIn out of range: {}", secs))
        })
}

/// Token data returned by the identity service for login and refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub identity: Option<Value>,
    pub expires_in: Option<u64>,
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Refresh request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Identity service response for both login and refresh
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default, alias = "user")]
    pub identity: Option<Value>,
    pub expires_in: Option<u64>,
}

impl From<GrantResponse> for TokenGrant {
    fn from(data: GrantResponse) -> Self {
        Self {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            identity: data.identity,
            expires_in: data.expires_in,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    /// The identity service could not issue a new access token
    RefreshFailed { message: String },
    /// The user logged out
    LoggedOut,
}

/// Session-ended signal delivered to the application shell
#[derive(Debug, Clone, Serialize)]
pub struct SessionEnded {
    #[serde(flatten)]
    pub reason: EndReason,
    pub identity: Value,
    pub ended_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            identity: json!({"id": 7, "name": "ops"}),
            issued_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_rotate_replaces_credentials() {
        let rotated = session()
            .rotate(TokenGrant {
                access_token: "A2".to_string(),
                refresh_token: Some("R2".to_string()),
                identity: None,
                expires_in: Some(900),
            })
            .unwrap();

        assert_eq!(rotated.access_token, "A2");
        assert_eq!(rotated.refresh_token, "R2");
        assert_eq!(rotated.identity, json!({"id": 7, "name": "ops"}));
        assert!(rotated.expires_at.unwrap() > Utc::now());
    }

    #[test]
    fn test_rotate_keeps_refresh_token_when_omitted() {
        let rotated = session()
            .rotate(TokenGrant {
                access_token: "A2".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(rotated.refresh_token, "R1");
        assert!(rotated.expires_at.is_none());
    }

    #[test]
    fn test_rotate_rejects_empty_access_token() {
        let err = session().rotate(TokenGrant::default()).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidResponse(_)));
    }

    #[test]
    fn test_out_of_range_expiry_is_invalid() {
        for expires_in in [10_000_000_000_000, u64::MAX] {
            let grant = TokenGrant {
                access_token: "A2".to_string(),
                refresh_token: Some("R2".to_string()),
                identity: None,
                expires_in: Some(expires_in),
            };

            let err = session().rotate(grant.clone()).unwrap_err();
            assert!(matches!(err, IdentityError::InvalidResponse(_)), "{expires_in}");

            let err = Session::from_grant(grant).unwrap_err();
            assert!(matches!(err, IdentityError::InvalidResponse(_)), "{expires_in}");
        }
    }

    #[test]
    fn test_from_grant_requires_refresh_token() {
        let err = Session::from_grant(TokenGrant {
            access_token: "A1".to_string(),
            refresh_token: Some(String::new()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidResponse(_)));
    }

    #[test]
    fn test_grant_response_accepts_aliases() {
        let data: GrantResponse = serde_json::from_value(json!({
            "token": "A9",
            "refreshToken": "R9",
            "user": {"email": "admin@example.com"}
        }))
        .unwrap();
        let grant = TokenGrant::from(data);

        assert_eq!(grant.access_token, "A9");
        assert_eq!(grant.refresh_token.as_deref(), Some("R9"));
        assert_eq!(grant.identity, Some(json!({"email": "admin@example.com"})));
    }

    #[test]
    fn test_session_ended_serialization() {
        let ended = SessionEnded {
            reason: EndReason::RefreshFailed {
                message: "timed out".to_string(),
            },
            identity: json!({"id": 7}),
            ended_at: Utc::now(),
        };
        let value = serde_json::to_value(&ended).unwrap();

        assert_eq!(value["reason"], "refresh_failed");
        assert_eq!(value["message"], "timed out");
        assert_eq!(value["identity"]["id"], 7);
    }
}
