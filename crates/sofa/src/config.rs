//! Client and changes-feed configuration.
//!
//! Every struct deserializes with defaults for missing members, and every
//! duration is written in milliseconds:
//!
//! ```toml
//! url = "http://localhost:5984"
//! request_timeout = 30000
//!
//! [feed]
//! channel_capacity = 64
//! heartbeat = 10000
//!
//! [feed.reconnect]
//! initial_delay = 100
//! max_attempts = 5
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for a [`Client`](crate::Client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server base URL
    pub url: String,
    /// Timeout for buffered requests; streamed feeds are governed by
    /// [`FeedConfig::idle_timeout`] instead
    #[serde(with = "millis_opt")]
    pub request_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    /// Defaults for changes feeds opened through this client
    pub feed: FeedConfig,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Let buffered requests wait indefinitely
    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5984".to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            user_agent: None,
            feed: FeedConfig::default(),
        }
    }
}

/// Changes-feed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Events buffered between the feed task and the consumer
    pub channel_capacity: usize,
    /// Reconnect when nothing (not even a heartbeat) arrives for this long
    #[serde(with = "millis_opt")]
    pub idle_timeout: Option<Duration>,
    /// Heartbeat interval requested from the server
    #[serde(with = "millis_opt")]
    pub heartbeat: Option<Duration>,
    /// Server-side `timeout` sent with long-poll and continuous requests
    #[serde(with = "millis_opt")]
    pub server_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl FeedConfig {
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Option<Duration>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_server_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.server_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            idle_timeout: Some(Duration::from_secs(60)),
            heartbeat: Some(Duration::from_secs(10)),
            server_timeout: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Backoff between reconnect attempts of a continuous feed.
///
/// Attempts are counted per outage: the counter resets once a connection
/// is established again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Give up on the first failure
    pub fn never() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Whether attempt number `attempt` (1-based) is allowed
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Delay before attempt number `attempt` (1-based); attempt 0 is immediate.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::millis::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.feed.channel_capacity, 64);
        assert_eq!(config.feed.reconnect.max_attempts, None);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("http://db:5984")
            .with_user_agent("test")
            .without_request_timeout()
            .with_feed(
                FeedConfig::default()
                    .with_channel_capacity(0)
                    .with_heartbeat(None)
                    .with_reconnect(ReconnectPolicy::never()),
            );

        assert_eq!(config.url, "http://db:5984");
        assert_eq!(config.user_agent.as_deref(), Some("test"));
        assert!(config.request_timeout.is_none());
        assert_eq!(config.feed.channel_capacity, 1);
        assert!(config.feed.heartbeat.is_none());
        assert!(!config.feed.reconnect.allows(1));
    }

    #[test]
    fn test_backoff() {
        let policy = ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1));

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
        assert!(policy.allows(1_000_000));

        let limited = policy.with_max_attempts(Some(2));
        assert!(limited.allows(2));
        assert!(!limited.allows(3));
    }

    #[test]
    fn test_from_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            url = "http://couch:5984"
            request_timeout = 5000

            [feed]
            channel_capacity = 8
            idle_timeout = 2500

            [feed.reconnect]
            initial_delay = 50
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.url, "http://couch:5984");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.feed.channel_capacity, 8);
        assert_eq!(config.feed.idle_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.feed.heartbeat, Some(Duration::from_secs(10)));
        assert_eq!(config.feed.reconnect.initial_delay, Duration::from_millis(50));
        assert_eq!(config.feed.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(config.feed.reconnect.max_attempts, Some(3));
    }
}
