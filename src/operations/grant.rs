//! Access manager grant.

use super::{default_query, parse_json, private, Operation, MISSING_SECRET_KEY};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{url_encode, OperationType, Query};
use serde_json::Value;
use std::collections::BTreeMap;

const GRANT_PATH: &str = "/v1/auth/grant/sub-key/";

/// Grant read/write/manage rights to auth keys on channels or groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantRequest {
    pub auth_keys: Vec<String>,
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
    pub read: bool,
    pub write: bool,
    pub manage: bool,
    /// Grant lifetime in minutes, as text. "0" grants indefinitely; values
    /// below -1 are not sent. Non-integers fail query construction.
    pub ttl: Option<String>,
}

/// Rights held by one auth key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessKeyData {
    pub read: bool,
    pub write: bool,
    pub manage: bool,
    pub ttl: Option<i64>,
}

/// Parsed grant result.
///
/// `channels` and `channel_groups` map a channel (or group) name to the
/// rights of each auth key on it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantResponse {
    pub level: String,
    pub subscribe_key: String,
    pub ttl: Option<i64>,
    pub channels: BTreeMap<String, BTreeMap<String, AccessKeyData>>,
    pub channel_groups: BTreeMap<String, BTreeMap<String, AccessKeyData>>,
}

impl private::Sealed for GrantRequest {}

impl Operation for GrantRequest {
    type Response = GrantResponse;

    fn operation_type(&self) -> OperationType {
        OperationType::Grant
    }

    fn validate(&self, config: &Config) -> Result<()> {
        super::require_publish_key(config, OperationType::Grant)?;
        super::require_subscribe_key(config, OperationType::Grant)?;
        if config.secret_key.is_empty() {
            return Err(Error::validation(OperationType::Grant, MISSING_SECRET_KEY));
        }
        Ok(())
    }

    fn build_path(&self, config: &Config) -> Result<String> {
        Ok(format!("{}{}", GRANT_PATH, url_encode(&config.subscribe_key)))
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        let mut q = default_query(config);

        q.set_flag("r", self.read);
        q.set_flag("w", self.write);
        q.set_flag("m", self.manage);

        if !self.auth_keys.is_empty() {
            q.set("auth", self.auth_keys.join(","));
        }
        if !self.channels.is_empty() {
            q.set("channel", self.channels.join(","));
        }
        if !self.channel_groups.is_empty() {
            q.set("channel-group", self.channel_groups.join(","));
        }

        if let Some(ttl) = self.ttl.as_deref().filter(|t| !t.is_empty()) {
            let parsed: i64 = ttl.parse().map_err(|e| {
                Error::validation(OperationType::Grant, format!("invalid ttl {ttl:?}: {e}"))
            })?;
            if parsed >= -1 {
                q.set("ttl", ttl);
            }
        }

        Ok(q)
    }

    fn requires_auth(&self) -> bool {
        true
    }

    fn affiliated_channels(&self) -> usize {
        self.channels.len()
    }

    fn affiliated_groups(&self) -> usize {
        self.channel_groups.len()
    }

    fn parse_response(&self, body: &[u8]) -> Result<GrantResponse> {
        let value = parse_json(OperationType::Grant, body)?;
        let payload = value
            .get("payload")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::parsing(OperationType::Grant, "missing payload object", body))?;

        let mut response = GrantResponse {
            level: str_field(payload.get("level")),
            subscribe_key: str_field(payload.get("subscribe_key")),
            ttl: payload.get("ttl").and_then(Value::as_i64),
            ..Default::default()
        };

        // Single-channel (user level) shape: {"channel": "...", "auths": {...}}
        if let Some(channel) = payload.get("channel").and_then(Value::as_str) {
            let auths = auths_of(payload.get("auths"), body)?;
            response.channels.insert(channel.to_string(), auths);
        }
        if let Some(group) = payload.get("channel-group").and_then(Value::as_str) {
            let auths = auths_of(payload.get("auths"), body)?;
            response.channel_groups.insert(group.to_string(), auths);
        }

        // Multi-target shapes: {"channels": {"ch": {"auths": {...}}}}
        collect_targets(payload.get("channels"), &mut response.channels, body)?;
        collect_targets(payload.get("channel-groups"), &mut response.channel_groups, body)?;

        Ok(response)
    }
}

fn str_field(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_string()
}

fn collect_targets(
    value: Option<&Value>,
    into: &mut BTreeMap<String, BTreeMap<String, AccessKeyData>>,
    body: &[u8],
) -> Result<()> {
    let Some(targets) = value.and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, target) in targets {
        let auths = auths_of(target.get("auths"), body)?;
        into.insert(name.clone(), auths);
    }
    Ok(())
}

fn auths_of(value: Option<&Value>, body: &[u8]) -> Result<BTreeMap<String, AccessKeyData>> {
    let mut auths = BTreeMap::new();
    let Some(value) = value else {
        return Ok(auths);
    };
    let map = value
        .as_object()
        .ok_or_else(|| Error::parsing(OperationType::Grant, "auths is not an object", body))?;

    for (key, rights) in map {
        auths.insert(
            key.clone(),
            AccessKeyData {
                read: flag(rights.get("r")),
                write: flag(rights.get("w")),
                manage: flag(rights.get("m")),
                ttl: rights.get("ttl").and_then(Value::as_i64),
            },
        );
    }
    Ok(auths)
}

/// Rights arrive as "1"/"0" strings or as numbers.
fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}
