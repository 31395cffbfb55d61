//! Long-poll subscribe request and its response envelope.

use super::{
    channel_path, private, require_subscribe_key, timetoken_of, Operation,
    MISSING_CHANNEL_OR_GROUP,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{url_encode, Cursor, OperationType, Query};
use serde::Deserialize;
use serde_json::Value;

/// One long-poll iteration for the current subscription set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeOperation {
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
    pub cursor: Cursor,
    pub heartbeat: Option<u32>,
    pub filter_expression: Option<String>,
}

/// Decoded long-poll response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscribeEnvelope {
    /// Position to present on the next request.
    pub cursor: Cursor,
    pub messages: Vec<EnvelopeMessage>,
}

/// One event as delivered by the service.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopeMessage {
    pub channel: String,
    /// Subscription that matched (wildcard or group), when different.
    pub subscription: Option<String>,
    pub payload: Value,
    pub timetoken: u64,
    pub region: u32,
    pub publisher: Option<String>,
    pub user_metadata: Option<Value>,
    /// 1 = signal; absent or 0 = message.
    pub message_type: Option<u32>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    t: WireCursor,
    #[serde(default)]
    m: Vec<WireMessage>,
}

#[derive(Deserialize)]
struct WireCursor {
    t: Value,
    #[serde(default)]
    r: u32,
}

#[derive(Deserialize)]
struct WireMessage {
    c: String,
    #[serde(default)]
    b: Option<String>,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    p: Option<WireCursor>,
    #[serde(default)]
    i: Option<String>,
    #[serde(default)]
    u: Option<Value>,
    #[serde(default)]
    e: Option<u32>,
}

impl SubscribeEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let op = OperationType::Subscribe;
        let wire: WireEnvelope = serde_json::from_slice(body)
            .map_err(|e| Error::parsing(op, format!("invalid subscribe envelope: {e}"), body))?;

        let cursor = Cursor::new(
            timetoken_of(&wire.t.t)
                .ok_or_else(|| Error::parsing(op, "invalid envelope timetoken", body))?,
            wire.t.r,
        );

        let messages = wire
            .m
            .into_iter()
            .map(|m| {
                let publish = m
                    .p
                    .ok_or_else(|| Error::parsing(op, "message without publish timetoken", body))?;
                let timetoken = timetoken_of(&publish.t)
                    .ok_or_else(|| Error::parsing(op, "invalid message timetoken", body))?;
                Ok(EnvelopeMessage {
                    subscription: m.b.filter(|b| *b != m.c),
                    channel: m.c,
                    payload: m.d,
                    timetoken,
                    region: publish.r,
                    publisher: m.i,
                    user_metadata: m.u,
                    message_type: m.e,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { cursor, messages })
    }
}

impl private::Sealed for SubscribeOperation {}

impl Operation for SubscribeOperation {
    type Response = SubscribeEnvelope;

    fn operation_type(&self) -> OperationType {
        OperationType::Subscribe
    }

    fn validate(&self, config: &Config) -> Result<()> {
        require_subscribe_key(config, OperationType::Subscribe)?;
        if self.channels.is_empty() && self.channel_groups.is_empty() {
            return Err(Error::validation(
                OperationType::Subscribe,
                MISSING_CHANNEL_OR_GROUP,
            ));
        }
        Ok(())
    }

    fn build_path(&self, config: &Config) -> Result<String> {
        Ok(format!(
            "/v2/subscribe/{}/{}/0",
            url_encode(&config.subscribe_key),
            channel_path(&self.channels)
        ))
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        let mut q = super::default_query(config);
        q.set("tt", self.cursor.timetoken.to_string());
        if !self.cursor.is_initial() {
            q.set("tr", self.cursor.region.to_string());
        }
        if !self.channel_groups.is_empty() {
            q.set("channel-group", self.channel_groups.join(","));
        }
        if let Some(heartbeat) = self.heartbeat {
            q.set("heartbeat", heartbeat.to_string());
        }
        if let Some(filter) = self.filter_expression.as_deref().filter(|f| !f.is_empty()) {
            q.set("filter-expr", filter);
        }
        Ok(q)
    }

    fn affiliated_channels(&self) -> usize {
        self.channels.len()
    }

    fn affiliated_groups(&self) -> usize {
        self.channel_groups.len()
    }

    fn parse_response(&self, body: &[u8]) -> Result<SubscribeEnvelope> {
        SubscribeEnvelope::parse(body)
    }
}
