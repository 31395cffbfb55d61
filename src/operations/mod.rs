//! Operation descriptors.
//!
//! Every request the client can make implements [`Operation`]: it
//! validates its inputs, builds its path, query and body, and parses the
//! service's response. The pipeline executes any of them the same way.
//!
//! Path and query construction is a pure function of the descriptor's
//! fields and the config. Per-request values (`requestid`, `timestamp`,
//! `signature`, telemetry) are added by the pipeline afterwards.

mod grant;
mod history;
mod leave;
mod publish;
mod push;
mod subscribe;
mod time;

pub use grant::{AccessKeyData, GrantRequest, GrantResponse};
pub use history::{HistoryItem, HistoryRequest, HistoryResponse};
pub use leave::LeaveRequest;
pub use publish::{Publish, PublishRequest, PublishResponse, SignalRequest};
pub use push::{ListPushProvisionsRequest, ListPushProvisionsResponse};
pub use subscribe::{EnvelopeMessage, SubscribeEnvelope, SubscribeOperation};
pub use time::{TimeRequest, TimeResponse};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{HttpMethod, OperationType, Query};
use std::time::Duration;

pub(crate) const MISSING_PUBLISH_KEY: &str = "Missing Publish Key";
pub(crate) const MISSING_SUBSCRIBE_KEY: &str = "Missing Subscribe Key";
pub(crate) const MISSING_SECRET_KEY: &str = "Missing Secret Key";
pub(crate) const MISSING_CHANNEL: &str = "Missing Channel";
pub(crate) const MISSING_CHANNEL_OR_GROUP: &str = "Missing Channel or Channel Group";
pub(crate) const MISSING_MESSAGE: &str = "Missing Message";
pub(crate) const MISSING_DEVICE_ID: &str = "Missing Device ID";
pub(crate) const MISSING_PUSH_TYPE: &str = "Missing Push Type";
pub(crate) const MISSING_PUSH_TOPIC: &str = "Missing Push Topic";

mod private {
    pub trait Sealed {}
}

/// Uniform contract for every request kind.
///
/// Sealed: the set of operations is fixed by this crate.
pub trait Operation: private::Sealed {
    /// Typed result of a successful request.
    type Response;

    fn operation_type(&self) -> OperationType;

    /// Check required keys and fields before any I/O.
    fn validate(&self, config: &Config) -> Result<()>;

    fn build_path(&self, config: &Config) -> Result<String>;

    fn build_query(&self, config: &Config) -> Result<Query>;

    fn build_body(&self, _config: &Config) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn http_method(&self) -> HttpMethod {
        HttpMethod::Get
    }

    /// Whether the request must carry a signature.
    fn requires_auth(&self) -> bool {
        false
    }

    fn connect_timeout(&self, config: &Config) -> Duration {
        config.connect_timeout
    }

    fn request_timeout(&self, config: &Config) -> Duration {
        if self.operation_type().is_streaming() {
            config.subscribe_request_timeout
        } else {
            config.non_subscribe_request_timeout
        }
    }

    /// Channels touched by the request, for telemetry.
    fn affiliated_channels(&self) -> usize {
        0
    }

    /// Channel groups touched by the request, for telemetry.
    fn affiliated_groups(&self) -> usize {
        0
    }

    fn parse_response(&self, body: &[u8]) -> Result<Self::Response>;
}

/// Query every request starts from.
pub(crate) fn default_query(config: &Config) -> Query {
    let mut query = Query::new();
    query.set("uuid", config.uuid.as_str());
    query
}

pub(crate) fn require_subscribe_key(config: &Config, operation: OperationType) -> Result<()> {
    if config.subscribe_key.is_empty() {
        return Err(Error::validation(operation, MISSING_SUBSCRIBE_KEY));
    }
    Ok(())
}

pub(crate) fn require_publish_key(config: &Config, operation: OperationType) -> Result<()> {
    if config.publish_key.is_empty() {
        return Err(Error::validation(operation, MISSING_PUBLISH_KEY));
    }
    Ok(())
}

/// Parse a service JSON body, keeping the raw bytes on failure.
pub(crate) fn parse_json(operation: OperationType, body: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(body)
        .map_err(|e| Error::parsing(operation, format!("error unmarshalling response: {e}"), body))
}

/// Timetokens arrive either as JSON numbers or as decimal strings.
pub(crate) fn timetoken_of(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Comma-joined, individually encoded channel list for a path segment;
/// "," when empty.
pub(crate) fn channel_path(channels: &[String]) -> String {
    if channels.is_empty() {
        return ",".to_string();
    }
    channels
        .iter()
        .map(|c| crate::types::url_encode(c))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timetoken_of_number_and_string() {
        assert_eq!(timetoken_of(&json!(15000000000000000u64)), Some(15000000000000000));
        assert_eq!(timetoken_of(&json!("15000000000000001")), Some(15000000000000001));
        assert_eq!(timetoken_of(&json!("abc")), None);
        assert_eq!(timetoken_of(&json!(null)), None);
    }

    #[test]
    fn test_channel_path() {
        assert_eq!(channel_path(&[]), ",");
        assert_eq!(
            channel_path(&["a b".to_string(), "c".to_string()]),
            "a%20b,c"
        );
    }

    #[test]
    fn test_parse_json_keeps_body() {
        let err = parse_json(OperationType::History, b"not json").unwrap_err();
        assert_eq!(err.raw_body(), Some(&b"not json"[..]));
    }
}
