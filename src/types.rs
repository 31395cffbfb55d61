//! Core value types shared by operations, the pipeline and subscriptions.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Characters left untouched when percent-encoding path segments and query
/// values (RFC 3986 unreserved set).
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a single path segment or query component.
pub fn url_encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Seconds since Unix epoch.
pub(crate) fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Tag identifying the kind of operation a request performs.
///
/// Used for telemetry bucketing, error attribution and for routing
/// long-poll responses to the subscription manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Publish,
    Signal,
    History,
    Grant,
    ListPushProvisions,
    Time,
    Leave,
    Subscribe,
}

impl OperationType {
    /// Whether the operation runs over the long-poll (streaming) client.
    pub fn is_streaming(self) -> bool {
        matches!(self, OperationType::Subscribe)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Publish => "publish",
            OperationType::Signal => "signal",
            OperationType::History => "history",
            OperationType::Grant => "grant",
            OperationType::ListPushProvisions => "list_push_provisions",
            OperationType::Time => "time",
            OperationType::Leave => "leave",
            OperationType::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP verb used by an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push notification service a device is registered with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PushType {
    #[default]
    None,
    Gcm,
    Apns,
    Apns2,
    Mpns,
}

impl fmt::Display for PushType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PushType::None => "none",
            PushType::Gcm => "gcm",
            PushType::Apns => "apns",
            PushType::Apns2 => "apns2",
            PushType::Mpns => "mpns",
        };
        f.write_str(s)
    }
}

/// APNS2 environment for device registrations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PushEnvironment {
    #[default]
    Development,
    Production,
}

impl fmt::Display for PushEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushEnvironment::Development => f.write_str("development"),
            PushEnvironment::Production => f.write_str("production"),
        }
    }
}

/// Server-issued position of a subscriber in the event stream.
///
/// Ordered by timetoken first, then region.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub timetoken: u64,
    pub region: u32,
}

impl Cursor {
    pub fn new(timetoken: u64, region: u32) -> Self {
        Self { timetoken, region }
    }

    /// A cursor at timetoken 0 asks the server for a fresh position
    /// without replaying anything.
    pub fn is_initial(&self) -> bool {
        self.timetoken == 0
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({}, r{})", self.timetoken, self.region)
    }
}

/// Ordered query parameters.
///
/// `set` replaces an existing key in place so construction order is kept,
/// which keeps descriptor output byte-identical across calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    /// Set `key` to "1" or "0".
    pub fn set_flag(&mut self, key: impl Into<String>, flag: bool) {
        self.set(key, if flag { "1" } else { "0" });
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.pairs.iter().position(|(k, _)| k == key)?;
        Some(self.pairs.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode in insertion order.
    pub fn encode(&self) -> String {
        Self::join(self.pairs.iter())
    }

    /// Encode sorted by key, as used for request signatures.
    pub fn encode_sorted(&self) -> String {
        let mut sorted: Vec<&(String, String)> = self.pairs.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self::join(sorted.into_iter())
    }

    fn join<'a>(pairs: impl Iterator<Item = &'a (String, String)>) -> String {
        pairs
            .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
