// Identity service client: login and credential refresh

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;

use crate::error::{transport_error_kind, IdentityError};
use crate::session::{GrantResponse, LoginRequest, RefreshRequest, TokenGrant};

/// Issues credentials for the console
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<TokenGrant, IdentityError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, IdentityError>;
}

/// Identity service reached over HTTP with JSON bodies
pub struct HttpIdentityService {
    client: Client,
    login_url: Url,
    refresh_url: Url,
}

impl HttpIdentityService {
    pub fn new(login_url: Url, refresh_url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create identity service HTTP client")?;

        Ok(Self {
            client,
            login_url,
            refresh_url,
        })
    }

    async fn post_for_grant<B: Serialize + Sync>(
        &self,
        url: &Url,
        body: &B,
        action: &str,
    ) -> Result<TokenGrant, IdentityError> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(
                    error_kind = transport_error_kind(&e),
                    error = %e,
                    url = %url,
                    "Identity service {} request failed",
                    action
                );
                IdentityError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                body = %error_text,
                "Identity service {} failed",
                action
            );
            return Err(IdentityError::Rejected {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let data: GrantResponse = response.json().await.map_err(|e| {
            IdentityError::InvalidResponse(format!("failed to parse {} response: {}", action, e))
        })?;

        if data.access_token.is_empty() {
            return Err(IdentityError::InvalidResponse(format!(
                "{} response does not contain an access token",
                action
            )));
        }

        Ok(data.into())
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn login(&self, username: &str, password: &str) -> Result<TokenGrant, IdentityError> {
        tracing::info!("Logging in as {}...", username);
        let request = LoginRequest { username, password };
        self.post_for_grant(&self.login_url, &request, "login").await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, IdentityError> {
        tracing::debug!("Requesting new access token from identity service...");
        let request = RefreshRequest { refresh_token };
        let grant = self
            .post_for_grant(&self.refresh_url, &request, "refresh")
            .await?;

        tracing::info!(
            expires_in = ?grant.expires_in,
            rotated_refresh_token = grant.refresh_token.is_some(),
            "Access token refreshed"
        );
        Ok(grant)
    }
}
