//! Discord API client
//!
//! [`UpstreamClient`] is the seam between the auth services and the OAuth
//! provider. Requests and responses are closed value types so the refresh
//! protocol can inspect status codes without knowing about HTTP libraries.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::DiscordConfig;

/// Request timeout for every upstream call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP method of an upstream request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Authenticated call against the upstream API, relative to its base URL
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: UpstreamMethod,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: UpstreamMethod::Get,
            path: path.into(),
            body: None,
        }
    }
}

/// Status and raw body of an upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The access credential was rejected
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Decode a JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, UpstreamError> {
        serde_json::from_str(&self.body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

/// Credentials returned by a code exchange or a refresh
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Failures talking to the upstream provider
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The provider refused the grant (4xx other than 429)
    #[error("Upstream rejected the request with status {status}")]
    Rejected { status: u16 },

    /// 5xx or 429 from the provider
    #[error("Upstream unavailable (status {status})")]
    Unavailable { status: u16 },

    /// Connection, TLS or timeout failure
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// The provider answered with a body we could not decode
    #[error("Upstream response could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Classify a non-success status from a token endpoint
    pub fn from_status(status: u16) -> Self {
        if status == 429 || status >= 500 {
            UpstreamError::Unavailable { status }
        } else {
            UpstreamError::Rejected { status }
        }
    }
}

/// Calls the upstream provider on behalf of a user
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send `request` with `access_token` as bearer credential.
    ///
    /// Any HTTP status is a successful `UpstreamResponse`; only transport
    /// failures are errors.
    async fn send(&self, request: &UpstreamRequest, access_token: &str) -> Result<UpstreamResponse, UpstreamError>;

    /// Exchange a refresh credential for a new credential pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, UpstreamError>;

    /// Exchange an authorization code for a credential pair
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, UpstreamError>;
}

/// reqwest-backed Discord client
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("codex-auth/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, UpstreamError> {
        let resp = self
            .http
            .post(self.url("/oauth2/token"))
            .form(form)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            tracing::debug!(status, "Token endpoint returned an error");
            return Err(UpstreamError::from_status(status));
        }

        resp.json::<TokenSet>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl UpstreamClient for DiscordClient {
    async fn send(&self, request: &UpstreamRequest, access_token: &str) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.url(&request.path);
        let builder = match request.method {
            UpstreamMethod::Get => self.http.get(url),
            UpstreamMethod::Post => self.http.post(url),
            UpstreamMethod::Put => self.http.put(url),
            UpstreamMethod::Patch => self.http.patch(url),
            UpstreamMethod::Delete => self.http.delete(url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let resp = builder
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(UpstreamResponse { status, body })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, UpstreamError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, UpstreamError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }
}
