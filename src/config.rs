//! Client configuration.

use std::time::Duration;

/// Default origin host.
pub const DEFAULT_ORIGIN: &str = "ps.pndsn.com";

/// Client configuration.
///
/// Empty key strings mean "not configured"; operations that need a key
/// fail validation naming it.
#[derive(Clone, Debug)]
pub struct Config {
    pub publish_key: String,
    pub subscribe_key: String,
    pub secret_key: String,
    /// Auth key attached to requests when set.
    pub auth_key: String,

    /// Client-instance identifier, sent as `uuid` on every request.
    pub uuid: String,

    /// Host serving the API.
    pub origin: String,
    /// Use https.
    pub secure: bool,

    /// Default: 5s
    pub connect_timeout: Duration,
    /// Read timeout for transactional requests. Default: 10s
    pub non_subscribe_request_timeout: Duration,
    /// Read timeout for long-poll requests. Must exceed the server's hold
    /// time. Default: 310s
    pub subscribe_request_timeout: Duration,

    /// Presence timeout announced on subscribe (`heartbeat`).
    pub presence_timeout: Option<u32>,
    /// Server-side message filter for subscriptions.
    pub filter_expression: Option<String>,

    /// Consecutive long-poll failures tolerated before giving up.
    /// Default: 5
    pub maximum_reconnection_retries: u32,
    /// First reconnect delay; doubles per consecutive failure.
    pub reconnection_base_delay: Duration,
    pub reconnection_max_delay: Duration,

    /// Skip the leave call on unsubscribe.
    pub suppress_leave_events: bool,

    /// Queue depth for channel listeners. Default: 1000
    pub listener_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            publish_key: String::new(),
            subscribe_key: String::new(),
            secret_key: String::new(),
            auth_key: String::new(),
            uuid: format!("pn-{}", uuid::Uuid::new_v4()),
            origin: DEFAULT_ORIGIN.to_string(),
            secure: true,
            connect_timeout: Duration::from_secs(5),
            non_subscribe_request_timeout: Duration::from_secs(10),
            subscribe_request_timeout: Duration::from_secs(310),
            presence_timeout: None,
            filter_expression: None,
            maximum_reconnection_retries: 5,
            reconnection_base_delay: Duration::from_secs(1),
            reconnection_max_delay: Duration::from_secs(32),
            suppress_leave_events: false,
            listener_buffer_size: 1000,
        }
    }
}

impl Config {
    /// Configuration wired to the public demo keyset.
    pub fn demo() -> Self {
        Self {
            publish_key: "demo".to_string(),
            subscribe_key: "demo".to_string(),
            ..Default::default()
        }
    }

    /// `scheme://origin` prefix for every request URL.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.origin)
    }

    /// Delay before reconnect attempt `attempt` (1-based), doubling from
    /// the base delay and capped at the max delay.
    pub fn reconnection_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.reconnection_base_delay
            .saturating_mul(1u32 << shift)
            .min(self.reconnection_max_delay)
    }
}
