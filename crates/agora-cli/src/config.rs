//! Client configuration loaded from environment variables (and `.env`).

use std::path::PathBuf;
use std::time::Duration;

use agora_api::ApiConfig;
use agora_gateway::GatewayConfig;

#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Chat server origin.
    /// Env: `AGORA_SERVER_URL`
    /// Default: `http://localhost:3000`
    pub server_url: String,

    /// REST API base.
    /// Env: `AGORA_API_URL`
    /// Default: `{server_url}/api`
    pub api_url: String,

    /// Bearer token used for both the socket handshake and REST calls.
    /// Env: `AGORA_TOKEN`
    pub token: Option<String>,

    /// Communities whose rooms are joined after connecting; the first one
    /// becomes active.
    /// Env: `AGORA_COMMUNITY_IDS` (comma separated)
    pub community_ids: Vec<String>,

    /// Env: `AGORA_ACK_TIMEOUT_SECS` (0 waits forever)
    /// Default: 15
    pub ack_timeout: Option<Duration>,

    /// Env: `AGORA_RECONNECT_ATTEMPTS` (0 disables reconnecting)
    /// Default: unlimited
    pub reconnect_attempts: Option<u32>,

    /// Where the current user id is remembered between runs.
    /// Env: `AGORA_SESSION_PATH`
    /// Default: `.agora/session.json`
    pub session_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            api_url: "http://localhost:3000/api".to_string(),
            token: None,
            community_ids: Vec::new(),
            ack_timeout: Some(agora_gateway::config::DEFAULT_ACK_TIMEOUT),
            reconnect_attempts: None,
            session_path: PathBuf::from(".agora/session.json"),
        }
    }
}

impl CliConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("AGORA_SERVER_URL") {
            config.server_url = url.trim_end_matches('/').to_string();
        }
        config.api_url = var("AGORA_API_URL").unwrap_or_else(|| format!("{}/api", config.server_url));

        config.token = var("AGORA_TOKEN").filter(|t| !t.trim().is_empty());

        if let Some(ids) = var("AGORA_COMMUNITY_IDS") {
            config.community_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(raw) = var("AGORA_ACK_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(0) => config.ack_timeout = None,
                Ok(secs) => config.ack_timeout = Some(Duration::from_secs(secs)),
                Err(_) => tracing::warn!(value = %raw, "Invalid AGORA_ACK_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(raw) = var("AGORA_RECONNECT_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(n) => config.reconnect_attempts = Some(n),
                Err(_) => {
                    tracing::warn!(value = %raw, "Invalid AGORA_RECONNECT_ATTEMPTS, using default")
                }
            }
        }

        if let Some(path) = var("AGORA_SESSION_PATH") {
            config.session_path = PathBuf::from(path);
        }

        config
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let mut gateway = GatewayConfig::new(&self.server_url);
        gateway.ack_timeout = self.ack_timeout;
        match self.reconnect_attempts {
            Some(0) => gateway.reconnect.enabled = false,
            attempts => gateway.reconnect.max_attempts = attempts,
        }
        gateway
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(&self.api_url)
    }
}
