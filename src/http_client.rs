use anyhow::Context;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Request, RequestBuilder, Response, Url};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{authenticate, Credential, FailureClassifier, RefreshCoordinator, Verdict};
use crate::error::{transport_error_kind, ApiError};
use crate::metrics::PipelineMetrics;
use crate::session::Session;

/// What a single dispatch produced
enum Dispatch {
    Delivered(Response),
    AuthFailure {
        credential: Credential,
        response: Response,
    },
}

/// HTTP client for the resource API with transparent session recovery
///
/// Every request runs through the same stages, in order:
/// authenticate -> execute -> classify -> (on 401) recover -> replay.
/// A 401 is absorbed by one refresh and one replay; anything else, including a
/// 401 on the replay, reaches the caller unchanged.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL every relative path is resolved against
    base_url: Url,

    classifier: FailureClassifier,
    coordinator: Arc<RefreshCoordinator>,
    metrics: Arc<PipelineMetrics>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(
        base_url: Url,
        classifier: FailureClassifier,
        coordinator: Arc<RefreshCoordinator>,
        metrics: Arc<PipelineMetrics>,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            classifier,
            coordinator,
            metrics,
        })
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve `path` against the base URL
    ///
    /// Paths that would leave the base URL (another origin, `..` above the
    /// base path) are rejected.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::ValidationError(format!("Invalid path {:?}: {}", path, e)))?;

        if url.origin() != self.base_url.origin() || !url.path().starts_with(self.base_url.path())
        {
            return Err(ApiError::ValidationError(format!(
                "Path {:?} escapes the API base URL",
                path
            )));
        }

        Ok(url)
    }

    /// Start building a request for `path`
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.client.request(method, self.endpoint(path)?))
    }

    /// Execute a request through the pipeline
    pub async fn send(&self, request: Request) -> Result<Response, ApiError> {
        self.metrics.record_request();

        // Taken before the first attempt consumes the request
        let replay = request.try_clone();
        let session = self.coordinator.current().await;

        let (credential, rejected) = match self.dispatch(request, session, false).await? {
            Dispatch::Delivered(response) => return Ok(response),
            Dispatch::AuthFailure {
                credential,
                response,
            } => (credential, response),
        };

        self.metrics.record_auth_failure();
        tracing::warn!(
            url = %rejected.url(),
            anonymous = credential.is_anonymous(),
            "Received 401, recovering session..."
        );

        let session = self.coordinator.recover(&credential).await?;

        match replay {
            Some(request) => self.replay(request, session).await,
            None => {
                tracing::warn!("Request body is not cloneable, returning the 401 without replay");
                Err(upstream_error(rejected).await)
            }
        }
    }

    /// Re-issue `request` once with `session`
    ///
    /// The request is marked as replayed, so a second 401 is terminal.
    pub async fn replay(&self, request: Request, session: Arc<Session>) -> Result<Response, ApiError> {
        self.metrics.record_replay();
        tracing::debug!(url = %request.url(), "Replaying request with refreshed session");

        match self.dispatch(request, Some(session), true).await? {
            Dispatch::Delivered(response) => Ok(response),
            Dispatch::AuthFailure { response, .. } => Err(upstream_error(response).await),
        }
    }

    /// Authenticate, execute, and classify one attempt
    async fn dispatch(
        &self,
        mut request: Request,
        session: Option<Arc<Session>>,
        replayed: bool,
    ) -> Result<Dispatch, ApiError> {
        let credential = authenticate(&mut request, session.as_deref())
            .context("Access token is not a valid header value")?;

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(
            method = %method,
            url = %url,
            replayed = replayed,
            anonymous = credential.is_anonymous(),
            "Sending HTTP request"
        );

        let outcome = self.client.execute(request).await;

        match self.classifier.classify(&url, replayed, &outcome) {
            Verdict::Success => {
                let response = outcome?;
                tracing::debug!(status = %response.status(), "Request successful");
                Ok(Dispatch::Delivered(response))
            }
            Verdict::AuthFailure => Ok(Dispatch::AuthFailure {
                credential,
                response: outcome?,
            }),
            Verdict::TerminalFailure => match outcome {
                Ok(response) => Err(upstream_error(response).await),
                Err(e) => {
                    tracing::error!(
                        error_kind = transport_error_kind(&e),
                        error = %e,
                        method = %method,
                        url = %url,
                        "HTTP request failed"
                    );
                    Err(e.into())
                }
            },
        }
    }
}

/// Convert a non-success response into a terminal error, keeping status and body
async fn upstream_error(response: Response) -> ApiError {
    let status = response.status();
    let url = response.url().clone();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let error_text = response.text().await.unwrap_or_default();

    tracing::error!(
        status = status.as_u16(),
        url = %url,
        response_body = %error_text,
        "HTTP request failed with error response"
    );

    ApiError::UpstreamError {
        status: status.as_u16(),
        message: error_text,
        content_type,
    }
}
