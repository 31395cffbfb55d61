//! Publish and signal.

use super::{
    channel_path, default_query, parse_json, private, require_publish_key, require_subscribe_key,
    timetoken_of, Operation, MISSING_CHANNEL, MISSING_MESSAGE,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{url_encode, HttpMethod, OperationType, Query};
use serde_json::Value;

/// Message to publish on one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishRequest {
    pub channel: String,
    pub message: Value,
    /// Metadata usable by subscriber filter expressions.
    pub meta: Option<Value>,
    /// Override the keyset's storage default.
    pub store: Option<bool>,
    /// Per-message storage TTL in hours.
    pub ttl: Option<u32>,
    /// Replicate to other regions. Default: true
    pub replicate: bool,
    /// Send the message in a POST body instead of the path.
    pub use_post: bool,
}

impl PublishRequest {
    pub fn new(channel: impl Into<String>, message: impl Into<Value>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
            meta: None,
            store: None,
            ttl: None,
            replicate: true,
            use_post: false,
        }
    }
}

/// A publish tagged with its sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct Publish {
    pub request: PublishRequest,
    pub sequence: u16,
}

/// Lightweight message that is neither stored nor replicated.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalRequest {
    pub channel: String,
    pub message: Value,
}

impl SignalRequest {
    pub fn new(channel: impl Into<String>, message: impl Into<Value>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

/// Server acknowledgement of a publish or signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishResponse {
    pub timetoken: u64,
}

fn validate_message(
    config: &Config,
    operation: OperationType,
    channel: &str,
    message: &Value,
) -> Result<()> {
    require_publish_key(config, operation)?;
    require_subscribe_key(config, operation)?;
    if channel.is_empty() {
        return Err(Error::validation(operation, MISSING_CHANNEL));
    }
    if message.is_null() {
        return Err(Error::validation(operation, MISSING_MESSAGE));
    }
    Ok(())
}

fn serialize(operation: OperationType, value: &Value) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::validation(operation, format!("message is not serializable: {e}")))
}

/// `[1, "Sent", "<timetoken>"]`
fn parse_ack(operation: OperationType, body: &[u8]) -> Result<PublishResponse> {
    let value = parse_json(operation, body)?;
    let timetoken = value
        .as_array()
        .and_then(|a| a.get(2))
        .and_then(timetoken_of)
        .ok_or_else(|| Error::parsing(operation, "missing publish timetoken", body))?;
    Ok(PublishResponse { timetoken })
}

impl private::Sealed for Publish {}

impl Operation for Publish {
    type Response = PublishResponse;

    fn operation_type(&self) -> OperationType {
        OperationType::Publish
    }

    fn validate(&self, config: &Config) -> Result<()> {
        validate_message(
            config,
            OperationType::Publish,
            &self.request.channel,
            &self.request.message,
        )
    }

    fn build_path(&self, config: &Config) -> Result<String> {
        let mut path = format!(
            "/publish/{}/{}/0/{}/0",
            url_encode(&config.publish_key),
            url_encode(&config.subscribe_key),
            channel_path(std::slice::from_ref(&self.request.channel)),
        );
        if !self.request.use_post {
            let message = serialize(OperationType::Publish, &self.request.message)?;
            path.push('/');
            path.push_str(&url_encode(&message));
        }
        Ok(path)
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        let mut q = default_query(config);
        q.set("seqn", self.sequence.to_string());

        if let Some(meta) = &self.request.meta {
            q.set("meta", serialize(OperationType::Publish, meta)?);
        }
        if let Some(store) = self.request.store {
            q.set_flag("store", store);
        }
        if let Some(ttl) = self.request.ttl {
            q.set("ttl", ttl.to_string());
        }
        if !self.request.replicate {
            q.set("norep", "true");
        }
        Ok(q)
    }

    fn build_body(&self, _config: &Config) -> Result<Vec<u8>> {
        if !self.request.use_post {
            return Ok(Vec::new());
        }
        Ok(serialize(OperationType::Publish, &self.request.message)?.into_bytes())
    }

    fn http_method(&self) -> HttpMethod {
        if self.request.use_post {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        }
    }

    fn affiliated_channels(&self) -> usize {
        1
    }

    fn parse_response(&self, body: &[u8]) -> Result<PublishResponse> {
        parse_ack(OperationType::Publish, body)
    }
}

impl private::Sealed for SignalRequest {}

impl Operation for SignalRequest {
    type Response = PublishResponse;

    fn operation_type(&self) -> OperationType {
        OperationType::Signal
    }

    fn validate(&self, config: &Config) -> Result<()> {
        validate_message(config, OperationType::Signal, &self.channel, &self.message)
    }

    fn build_path(&self, config: &Config) -> Result<String> {
        let message = serialize(OperationType::Signal, &self.message)?;
        Ok(format!(
            "/signal/{}/{}/0/{}/0/{}",
            url_encode(&config.publish_key),
            url_encode(&config.subscribe_key),
            channel_path(std::slice::from_ref(&self.channel)),
            url_encode(&message),
        ))
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        Ok(default_query(config))
    }

    fn affiliated_channels(&self) -> usize {
        1
    }

    fn parse_response(&self, body: &[u8]) -> Result<PublishResponse> {
        parse_ack(OperationType::Signal, body)
    }
}
