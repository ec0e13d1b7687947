use std::time::Duration;

use reqwest::{Response, StatusCode, Url};
use serde_json::Value;

use crate::error::ApiError;

/// Uploads above this size are refused before any request is made.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the REST API, e.g. `https://api.example.org/api`.
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Per-request timeout for JSON endpoints. Uploads are not bounded.
    pub request_timeout: Duration,
    pub max_upload_bytes: u64,
    /// Messages per page of conversation history.
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            page_size: 50,
        }
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Bearer-authenticated client for the chat REST endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: ApiConfig,
    pub(crate) token: String,
}

impl ApiClient {
    pub fn new(config: ApiConfig, token: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            token: token.into(),
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Base URL with the given path segments appended (each one escaped).
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url =
            Url::parse(&self.config.base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn a response into its JSON body, mapping failures onto
    /// [`ApiError`].
    pub(crate) async fn json_body(&self, resp: Response) -> Result<Value, ApiError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&text).unwrap_or(text),
            });
        }

        let body: Value = resp.json().await?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ApiError::Rejected(
                error_message(&body.to_string())
                    .unwrap_or_else(|| "Request was rejected by the server".to_string()),
            ));
        }
        Ok(body)
    }
}

fn error_message(text: &str) -> Option<String> {
    let body: Value = serde_json::from_str(text).ok()?;
    ["error", "message"].iter().find_map(|key| match body.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    })
}
