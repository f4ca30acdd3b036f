use std::time::Duration;

/// Configuration for Companion client behavior
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name presented to the device during pairing and `_systemInfo`
    pub name: String,

    /// Model string presented to the device
    pub model: String,

    /// Timeout for connection attempts (default: 10 seconds)
    pub connection_timeout: Duration,

    /// Timeout for a single request/reply exchange (default: 5 seconds)
    pub operation_timeout: Duration,

    /// Interval for polling keyboard focus state (default: 1 second)
    pub focus_poll_interval: Duration,

    /// How long an idle pairing connection stays cached (default: 120 seconds)
    pub idle_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "companion-rs".to_string(),
            model: "companion-rs".to_string(),
            connection_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
            focus_poll_interval: Duration::from_millis(1000),
            idle_ttl: Duration::from_secs(120),
        }
    }
}

impl ClientConfig {
    /// Create a config with a custom client name
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the model string
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-operation timeout
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the keyboard focus poll interval
    #[must_use]
    pub fn focus_poll_interval(mut self, interval: Duration) -> Self {
        self.focus_poll_interval = interval;
        self
    }

    /// Set the idle TTL for cached pairing connections
    #[must_use]
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }
}
