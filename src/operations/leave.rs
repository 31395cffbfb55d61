//! Presence leave, announced when unsubscribing.

use super::{
    channel_path, default_query, parse_json, private, require_subscribe_key, Operation,
    MISSING_CHANNEL_OR_GROUP,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{url_encode, OperationType, Query};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaveRequest {
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
}

impl private::Sealed for LeaveRequest {}

impl Operation for LeaveRequest {
    type Response = ();

    fn operation_type(&self) -> OperationType {
        OperationType::Leave
    }

    fn validate(&self, config: &Config) -> Result<()> {
        require_subscribe_key(config, OperationType::Leave)?;
        if self.channels.is_empty() && self.channel_groups.is_empty() {
            return Err(Error::validation(OperationType::Leave, MISSING_CHANNEL_OR_GROUP));
        }
        Ok(())
    }

    fn build_path(&self, config: &Config) -> Result<String> {
        Ok(format!(
            "/v2/presence/sub-key/{}/channel/{}/leave",
            url_encode(&config.subscribe_key),
            channel_path(&self.channels)
        ))
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        let mut q = default_query(config);
        if !self.channel_groups.is_empty() {
            q.set("channel-group", self.channel_groups.join(","));
        }
        Ok(q)
    }

    fn affiliated_channels(&self) -> usize {
        self.channels.len()
    }

    fn affiliated_groups(&self) -> usize {
        self.channel_groups.len()
    }

    fn parse_response(&self, body: &[u8]) -> Result<()> {
        parse_json(OperationType::Leave, body).map(|_| ())
    }
}
