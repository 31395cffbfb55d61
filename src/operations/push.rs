//! Push provisioning: list channels registered for a device.

use super::{
    default_query, parse_json, private, require_subscribe_key, Operation, MISSING_DEVICE_ID,
    MISSING_PUSH_TOPIC, MISSING_PUSH_TYPE,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{url_encode, OperationType, PushEnvironment, PushType, Query};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPushProvisionsRequest {
    pub device_id: String,
    pub push_type: PushType,
    /// APNS2 bundle topic; required for [`PushType::Apns2`].
    pub topic: Option<String>,
    pub environment: PushEnvironment,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPushProvisionsResponse {
    pub channels: Vec<String>,
}

impl private::Sealed for ListPushProvisionsRequest {}

impl Operation for ListPushProvisionsRequest {
    type Response = ListPushProvisionsResponse;

    fn operation_type(&self) -> OperationType {
        OperationType::ListPushProvisions
    }

    fn validate(&self, config: &Config) -> Result<()> {
        let op = OperationType::ListPushProvisions;
        require_subscribe_key(config, op)?;
        if self.device_id.is_empty() {
            return Err(Error::validation(op, MISSING_DEVICE_ID));
        }
        if self.push_type == PushType::None {
            return Err(Error::validation(op, MISSING_PUSH_TYPE));
        }
        if self.push_type == PushType::Apns2 && self.topic.as_deref().unwrap_or("").is_empty() {
            return Err(Error::validation(op, MISSING_PUSH_TOPIC));
        }
        Ok(())
    }

    fn build_path(&self, config: &Config) -> Result<String> {
        let sub = url_encode(&config.subscribe_key);
        let device = url_encode(&self.device_id);
        if self.push_type == PushType::Apns2 {
            Ok(format!("/v2/push/sub-key/{sub}/devices-apns2/{device}"))
        } else {
            Ok(format!("/v1/push/sub-key/{sub}/devices/{device}"))
        }
    }

    fn build_query(&self, config: &Config) -> Result<Query> {
        let mut q = default_query(config);
        q.set("type", self.push_type.to_string());
        if self.push_type == PushType::Apns2 {
            q.set("environment", self.environment.to_string());
            if let Some(topic) = &self.topic {
                q.set("topic", topic.as_str());
            }
        }
        Ok(q)
    }

    fn requires_auth(&self) -> bool {
        true
    }

    /// JSON array of channel names.
    fn parse_response(&self, body: &[u8]) -> Result<ListPushProvisionsResponse> {
        let op = OperationType::ListPushProvisions;
        let value = parse_json(op, body)?;
        let items = value
            .as_array()
            .ok_or_else(|| Error::parsing(op, "expected an array of channels", body))?;

        let channels = items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(Error::parsing(
                    op,
                    format!("channel is not a string: {other}"),
                    body,
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ListPushProvisionsResponse { channels })
    }
}
