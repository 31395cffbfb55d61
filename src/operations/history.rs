//! Channel message history.

use super::{
    default_query, parse_json, private, require_subscribe_key, timetoken_of, Operation,
    MISSING_CHANNEL,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{url_encode, OperationType, Query};
use serde_json::Value;

const MAX_COUNT: u32 = 100;

/// Fetch stored messages for one channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryRequest {
    pub channel: String,
    /// 1..=100, anything else means 100.
    pub count: Option<u32>,
    /// Oldest first.
    pub reverse: bool,
    /// Return each message's timetoken.
    pub include_timetoken: bool,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryItem {
    pub message: Value,
    pub timetoken: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryItem>,
    pub start_timetoken: u64,
    pub end_timetoken: u64,
}

impl private::Sealed for HistoryRequest {}

impl Operation for HistoryRequest {
    type Response = HistoryResponse;

    fn operation_type(&self) -> OperationType {
        OperationType::History
    }

    fn validate(&self, config: &Config) -> Result<()> {
        require_subscribe_key(config, OperationType::History)?;
        if self.channel.is_empty() {
            return Err(Error::validation(OperationType::History, MISSING_CHANNEL));
        }
        Ok(())
    }

    fn build_path(&self, config: &Config) -> Result<String> {
        Ok(format!(
            "/v2/history/sub-key/{}/channel/{}",
            url_encode(&config.subscribe_key),
            url_encode(&self.channel)
        ))
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        let mut q = default_query(config);
        let count = self
            .count
            .filter(|c| (1..=MAX_COUNT).contains(c))
            .unwrap_or(MAX_COUNT);
        q.set("count", count.to_string());
        q.set("reverse", self.reverse.to_string());
        q.set("include_token", self.include_timetoken.to_string());
        if let Some(start) = self.start {
            q.set("start", start.to_string());
        }
        if let Some(end) = self.end {
            q.set("end", end.to_string());
        }
        Ok(q)
    }

    fn affiliated_channels(&self) -> usize {
        1
    }

    /// `[[items], start, end]`
    fn parse_response(&self, body: &[u8]) -> Result<HistoryResponse> {
        let value = parse_json(OperationType::History, body)?;
        let parts = value
            .as_array()
            .filter(|a| a.len() >= 3)
            .ok_or_else(|| Error::parsing(OperationType::History, "expected a 3 element array", body))?;

        let items = parts[0]
            .as_array()
            .ok_or_else(|| Error::parsing(OperationType::History, "messages is not an array", body))?;

        let messages = items
            .iter()
            .map(|item| {
                if self.include_timetoken {
                    HistoryItem {
                        message: item.get("message").cloned().unwrap_or(Value::Null),
                        timetoken: item.get("timetoken").and_then(timetoken_of),
                    }
                } else {
                    HistoryItem {
                        message: item.clone(),
                        timetoken: None,
                    }
                }
            })
            .collect();

        Ok(HistoryResponse {
            messages,
            start_timetoken: timetoken_of(&parts[1]).unwrap_or_default(),
            end_timetoken: timetoken_of(&parts[2]).unwrap_or_default(),
        })
    }
}
