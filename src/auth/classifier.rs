// Decides what a completed request means for the session

use reqwest::{Response, StatusCode, Url};

/// Outcome category of an executed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Pass the response through unchanged
    Success,
    /// The credential was rejected; eligible for one refresh-and-replay cycle
    AuthFailure,
    /// Any other failure, surfaced to the caller unchanged
    TerminalFailure,
}

/// Classifies request outcomes
///
/// Requests to the refresh endpoint and replayed requests are never
/// `AuthFailure`, which bounds refresh attempts to one per logical call.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    refresh_endpoint: Url,
}

impl FailureClassifier {
    pub fn new(refresh_endpoint: Url) -> Self {
        Self { refresh_endpoint }
    }

    pub fn classify(
        &self,
        url: &Url,
        replayed: bool,
        outcome: &Result<Response, reqwest::Error>,
    ) -> Verdict {
        let status = outcome.as_ref().ok().map(Response::status);
        self.classify_status(url, replayed, status)
    }

    /// `status` is `None` when the request never produced a response
    pub fn classify_status(&self, url: &Url, replayed: bool, status: Option<StatusCode>) -> Verdict {
        let Some(status) = status else {
            return Verdict::TerminalFailure;
        };

        if status.is_success() {
            return Verdict::Success;
        }

        if status == StatusCode::UNAUTHORIZED && !replayed && !self.targets_refresh_endpoint(url) {
            return Verdict::AuthFailure;
        }

        Verdict::TerminalFailure
    }

    /// Same origin and path as the refresh endpoint, ignoring query and a
    /// trailing slash
    pub fn targets_refresh_endpoint(&self, url: &Url) -> bool {
        url.origin() == self.refresh_endpoint.origin()
            && url.path().trim_end_matches('/')
                == self.refresh_endpoint.path().trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn classifier() -> FailureClassifier {
        FailureClassifier::new(Url::parse("https://id.example.com/auth/refresh").unwrap())
    }

    fn api_url() -> Url {
        Url::parse("https://api.example.com/users?page=2").unwrap()
    }

    #[test]
    fn test_success_statuses() {
        let c = classifier();
        for status in [StatusCode::OK, StatusCode::CREATED, StatusCode::NO_CONTENT] {
            assert_eq!(c.classify_status(&api_url(), false, Some(status)), Verdict::Success);
        }
    }

    #[test]
    fn test_unauthorized_is_auth_failure() {
        let verdict = classifier().classify_status(&api_url(), false, Some(StatusCode::UNAUTHORIZED));
        assert_eq!(verdict, Verdict::AuthFailure);
    }

    #[test]
    fn test_other_failures_are_terminal() {
        let c = classifier();
        for status in [
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
        ] {
            assert_eq!(
                c.classify_status(&api_url(), false, Some(status)),
                Verdict::TerminalFailure
            );
        }
        assert_eq!(c.classify_status(&api_url(), false, None), Verdict::TerminalFailure);
    }

    #[test]
    fn test_replayed_unauthorized_is_terminal() {
        let verdict = classifier().classify_status(&api_url(), true, Some(StatusCode::UNAUTHORIZED));
        assert_eq!(verdict, Verdict::TerminalFailure);
    }

    #[test]
    fn test_refresh_endpoint_never_auth_failure() {
        let c = classifier();
        for url in [
            "https://id.example.com/auth/refresh",
            "https://id.example.com/auth/refresh/",
            "https://id.example.com/auth/refresh?retry=1",
        ] {
            let url = Url::parse(url).unwrap();
            assert_eq!(
                c.classify_status(&url, false, Some(StatusCode::UNAUTHORIZED)),
                Verdict::TerminalFailure,
                "{url}"
            );
        }
    }

    #[test]
    fn test_refresh_path_on_other_origin_is_not_refresh_endpoint() {
        let c = classifier();
        assert!(!c.targets_refresh_endpoint(&Url::parse("https://api.example.com/auth/refresh").unwrap()));
        assert!(!c.targets_refresh_endpoint(&Url::parse("http://id.example.com/auth/refresh").unwrap()));
        assert!(!c.targets_refresh_endpoint(&Url::parse("https://id.example.com/auth/refresher").unwrap()));
    }

    proptest! {
        #[test]
        fn prop_only_first_attempt_unauthorized_is_auth_failure(code in 100u16..600, replayed in any::<bool>()) {
            let status = StatusCode::from_u16(code).unwrap();
            let verdict = classifier().classify_status(&api_url(), replayed, Some(status));
            let expected = if status.is_success() {
                Verdict::Success
            } else if code == 401 && !replayed {
                Verdict::AuthFailure
            } else {
                Verdict::TerminalFailure
            };
            prop_assert_eq!(verdict, expected);
        }

        #[test]
        fn prop_refresh_endpoint_is_never_auth_failure(code in 100u16..600, replayed in any::<bool>()) {
            let c = classifier();
            let url = Url::parse("https://id.example.com/auth/refresh").unwrap();
            let status = StatusCode::from_u16(code).unwrap();
            prop_assert_ne!(c.classify_status(&url, replayed, Some(status)), Verdict::AuthFailure);
        }
    }
}
