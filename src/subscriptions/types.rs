//! Subscription requests, events and connection status.

use crate::error::{Error, ErrorKind};
use crate::operations::EnvelopeMessage;
use crate::types::Cursor;
use serde_json::Value;

/// Suffix of the companion channel carrying presence events.
pub const PRESENCE_SUFFIX: &str = "-pnpres";

/// Channels and groups to add to the subscription set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
    /// Also receive presence events for the given channels and groups.
    pub with_presence: bool,
    /// Start from this timetoken instead of "now". Only honored before the
    /// first successful long-poll.
    pub timetoken: Option<u64>,
}

impl SubscribeRequest {
    pub fn channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_presence(mut self) -> Self {
        self.with_presence = true;
        self
    }
}

/// Channels and groups to remove from the subscription set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsubscribeRequest {
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
}

impl UnsubscribeRequest {
    pub fn channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn channel_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel_groups: groups.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Connection state of the subscribe loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Unsubscribed,
    Connecting,
    Connected,
    Reconnecting,
    /// Gave up; waiting for the caller to subscribe again.
    Disconnected(ErrorKind),
}

/// What a status event reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCategory {
    Connecting,
    Connected,
    Reconnecting,
    Reconnected,
    Disconnected,
    /// A long-poll response could not be parsed and was skipped.
    MalformedResponse,
    ValidationFailed,
    /// Unsubscribe completed.
    Acknowledgment,
}

#[derive(Clone, Debug)]
pub struct StatusEvent {
    pub category: StatusCategory,
    pub previous: ConnectionStatus,
    pub current: ConnectionStatus,
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
    pub cursor: Cursor,
    pub error: Option<Error>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MessageEvent {
    pub channel: String,
    pub subscription: Option<String>,
    pub payload: Value,
    pub timetoken: u64,
    pub publisher: Option<String>,
    pub user_metadata: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignalEvent {
    pub channel: String,
    pub subscription: Option<String>,
    pub payload: Value,
    pub timetoken: u64,
    pub publisher: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PresenceEvent {
    /// Channel the presence change happened on (suffix stripped).
    pub channel: String,
    pub subscription: Option<String>,
    /// join, leave, timeout, state-change or interval.
    pub action: String,
    pub uuid: Option<String>,
    pub occupancy: Option<u64>,
    pub timestamp: Option<u64>,
    pub state: Option<Value>,
    pub timetoken: u64,
}

/// Anything delivered to listeners.
#[derive(Clone, Debug)]
pub enum Event {
    Message(MessageEvent),
    Signal(SignalEvent),
    Presence(PresenceEvent),
    Status(StatusEvent),
}

impl Event {
    /// Classify a raw envelope message.
    pub fn from_envelope(message: EnvelopeMessage) -> Self {
        if let Some(channel) = message.channel.strip_suffix(PRESENCE_SUFFIX) {
            let payload = &message.payload;
            return Event::Presence(PresenceEvent {
                channel: channel.to_string(),
                subscription: message
                    .subscription
                    .as_deref()
                    .map(|s| s.strip_suffix(PRESENCE_SUFFIX).unwrap_or(s).to_string()),
                action: payload
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or("interval")
                    .to_string(),
                uuid: payload.get("uuid").and_then(Value::as_str).map(str::to_string),
                occupancy: payload.get("occupancy").and_then(Value::as_u64),
                timestamp: payload.get("timestamp").and_then(Value::as_u64),
                state: payload.get("data").cloned(),
                timetoken: message.timetoken,
            });
        }

        if message.message_type == Some(1) {
            return Event::Signal(SignalEvent {
                channel: message.channel,
                subscription: message.subscription,
                payload: message.payload,
                timetoken: message.timetoken,
                publisher: message.publisher,
            });
        }

        Event::Message(MessageEvent {
            channel: message.channel,
            subscription: message.subscription,
            payload: message.payload,
            timetoken: message.timetoken,
            publisher: message.publisher,
            user_metadata: message.user_metadata,
        })
    }

    /// Timetoken of a data event; `None` for status events.
    pub fn timetoken(&self) -> Option<u64> {
        match self {
            Event::Message(e) => Some(e.timetoken),
            Event::Signal(e) => Some(e.timetoken),
            Event::Presence(e) => Some(e.timetoken),
            Event::Status(_) => None,
        }
    }
}
