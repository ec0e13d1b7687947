use std::time::Duration;

use rand::Rng;

/// Default timeout applied to every acknowledged command.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the chat server, e.g. `https://chat.example.org`.
    pub server_url: String,
    pub connect_timeout: Duration,
    pub join_timeout: Duration,
    /// `None` waits for acknowledgements indefinitely.
    pub ack_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    /// Sweep interval for expired typing entries.
    pub typing_sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            connect_timeout: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
            ack_timeout: Some(DEFAULT_ACK_TIMEOUT),
            reconnect: ReconnectPolicy::default(),
            typing_sweep_interval: Duration::from_millis(500),
        }
    }
}

impl GatewayConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Engine.IO websocket endpoint on the default Socket.IO path.
    pub fn socket_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/socket.io/?EIO=4&transport=websocket")
    }
}

/// Backoff between reconnection attempts after an unexpected drop.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized in either direction.
    pub jitter: f64,
    /// `None` keeps trying forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: 0.5,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before the given attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0)).min(self.max_delay)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempt < max)
    }
}
