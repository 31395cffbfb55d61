//! Server time.

use super::{default_query, parse_json, private, timetoken_of, Operation};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{OperationType, Query};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeResponse {
    pub timetoken: u64,
}

impl private::Sealed for TimeRequest {}

impl Operation for TimeRequest {
    type Response = TimeResponse;

    fn operation_type(&self) -> OperationType {
        OperationType::Time
    }

    fn validate(&self, _config: &Config) -> Result<()> {
        Ok(())
    }

    fn build_path(&self, _config: &Config) -> Result<String> {
        Ok("/time/0".to_string())
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        Ok(default_query(config))
    }

    fn parse_response(&self, body: &[u8]) -> Result<TimeResponse> {
        let value = parse_json(OperationType::Time, body)?;
        value
            .as_array()
            .and_then(|a| a.first())
            .and_then(timetoken_of)
            .map(|timetoken| TimeResponse { timetoken })
            .ok_or_else(|| Error::parsing(OperationType::Time, "expected [timetoken]", body))
    }
}
