//! JSON request payloads and response envelopes for the session channel.
//!
//! Two wire shapes exist. [`ProtocolVersion::Enveloped`] responses are
//! `{ "status": ..., "data": ..., "error": ... }`; [`ProtocolVersion::Legacy`]
//! responses are the bare payload object. One is chosen per deployment.

use crate::boundary::BoundaryString;
use crate::error::{DmError, DmResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Request options: a mapping from option name to arbitrary JSON.
pub type Options = Map<String, Value>;

/// Wire shape of stateful-channel responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Bare payload objects.
    Legacy,
    /// `status`/`data`/`error` envelopes.
    #[default]
    Enveloped,
}

impl FromStr for ProtocolVersion {
    type Err = DmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "v1" => Ok(Self::Legacy),
            "enveloped" | "envelope" | "v2" => Ok(Self::Enveloped),
            other => Err(DmError::InvalidArgument(format!(
                "unknown protocol version: {other}"
            ))),
        }
    }
}

/// Serializes request options into a terminated JSON payload.
///
/// Absent options encode as `{}`; the native side always expects a
/// parseable object.
pub fn encode_request(options: Option<&Options>) -> BoundaryString {
    let json = match options {
        Some(map) => Value::Object(map.clone()).to_string(),
        None => "{}".to_string(),
    };
    BoundaryString::new(&json)
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation status as sent by the service.
    pub status: Value,
    /// Payload; absent means "no content".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    /// Decodes `raw` according to `protocol`.
    ///
    /// Invalid JSON, a non-object top level, or (for enveloped responses) a
    /// missing `status` are decode failures. A failure status is not.
    pub fn decode(raw: &str, protocol: ProtocolVersion) -> DmResult<Self> {
        if raw.trim().is_empty() {
            return Err(DmError::Decode("empty response".into()));
        }
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(map) = value else {
            return Err(DmError::Decode("response is not a JSON object".into()));
        };

        match protocol {
            ProtocolVersion::Legacy => Ok(Self {
                status: Value::String("ok".into()),
                data: Some(Value::Object(map)),
                error: None,
            }),
            ProtocolVersion::Enveloped => {
                if !map.contains_key("status") {
                    return Err(DmError::Decode("envelope has no status field".into()));
                }
                Ok(serde_json::from_value(Value::Object(map))?)
            }
        }
    }

    /// Whether `status` reports success.
    pub fn is_success(&self) -> bool {
        match &self.status {
            Value::String(s) => s.eq_ignore_ascii_case("ok") || s.eq_ignore_ascii_case("success"),
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64() == Some(0),
            _ => false,
        }
    }

    /// The payload, or `None` when the field is absent or null.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref().filter(|v| !v.is_null())
    }

    /// Consumes the envelope and returns its payload.
    pub fn into_data(self) -> Option<Value> {
        self.data.filter(|v| !v.is_null())
    }

    /// Human-readable error text, if any.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| Some(Value::Object(obj.clone()).to_string())),
            other => Some(other.to_string()),
        }
    }
}
