// Attaches the session's bearer credential to outbound requests

use reqwest::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use reqwest::Request;

use crate::session::Session;

/// The credential a request was sent with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    /// No session existed when the request was authenticated
    Anonymous,
}

impl Credential {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credential::Anonymous)
    }

    /// Whether the request carried `session`'s current access token
    pub fn was_issued_by(&self, session: &Session) -> bool {
        match self {
            Credential::Bearer(token) => *token == session.access_token,
            Credential::Anonymous => false,
        }
    }
}

/// Set `Authorization: Bearer <token>` from `session`
///
/// Without a session any caller-supplied `Authorization` header is removed and
/// the request is reported as [`Credential::Anonymous`].
pub fn authenticate(
    request: &mut Request,
    session: Option<&Session>,
) -> Result<Credential, InvalidHeaderValue> {
    let Some(session) = session else {
        request.headers_mut().remove(AUTHORIZATION);
        return Ok(Credential::Anonymous);
    };

    let mut value = HeaderValue::from_str(&format!("Bearer {}", session.access_token))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);

    Ok(Credential::Bearer(session.access_token.clone()))
}
