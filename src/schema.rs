//! Payload schemas for declared producers and consumers.
//!
//! A schema pairs a serialization kind with the name of the payload type it carries.
//! Payloads travel through the orchestrator as `serde_json::Value` and are encoded to
//! bytes only at the broker boundary.

use crate::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialization kind of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SchemaType {
    /// Raw bytes - no specific encoding
    Bytes,
    /// UTF-8 encoded string
    String,
    /// 64-bit signed integer, big-endian
    Int64,
    /// JSON-encoded data
    Json,
}

impl SchemaType {
    /// Check if this schema type represents structured data (JSON)
    pub fn is_structured(&self) -> bool {
        matches!(self, SchemaType::Json)
    }

    /// Check if this schema type represents text data
    pub fn is_text(&self) -> bool {
        matches!(self, SchemaType::String | SchemaType::Json)
    }

    /// Encode a payload value into wire bytes
    ///
    /// `Bytes` accepts an array of octets or a string (its UTF-8 bytes).
    pub fn encode(&self, value: &Value) -> OrchestratorResult<Vec<u8>> {
        match self {
            SchemaType::Json => Ok(serde_json::to_vec(value)?),
            SchemaType::String => match value {
                Value::String(s) => Ok(s.clone().into_bytes()),
                other => Ok(other.to_string().into_bytes()),
            },
            SchemaType::Int64 => {
                let n = value.as_i64().ok_or_else(|| {
                    OrchestratorError::Serialization(format!("Int64 schema expects an integer, got {}", value))
                })?;
                Ok(n.to_be_bytes().to_vec())
            }
            SchemaType::Bytes => match value {
                Value::String(s) => Ok(s.clone().into_bytes()),
                other => serde_json::from_value::<Vec<u8>>(other.clone()).map_err(|e| {
                    OrchestratorError::Serialization(format!("Bytes schema expects octets: {}", e))
                }),
            },
        }
    }

    /// Decode wire bytes into a payload value
    ///
    /// `Bytes` decodes to an array of octets so handlers can take `Vec<u8>`.
    pub fn decode(&self, payload: &[u8]) -> OrchestratorResult<Value> {
        match self {
            SchemaType::Json => serde_json::from_slice(payload).map_err(|e| {
                OrchestratorError::Serialization(format!("JSON deserialization failed: {}", e))
            }),
            SchemaType::String => std::str::from_utf8(payload)
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| OrchestratorError::Serialization(format!("UTF-8 decode failed: {}", e))),
            SchemaType::Int64 => {
                let bytes: [u8; 8] = payload.try_into().map_err(|_| {
                    OrchestratorError::Serialization(format!(
                        "Int64 payload must be 8 bytes, got {}",
                        payload.len()
                    ))
                })?;
                Ok(Value::from(i64::from_be_bytes(bytes)))
            }
            SchemaType::Bytes => Ok(Value::from(payload.to_vec())),
        }
    }
}

impl Default for SchemaType {
    fn default() -> Self {
        SchemaType::Bytes
    }
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaType::Bytes => write!(f, "Bytes"),
            SchemaType::String => write!(f, "String"),
            SchemaType::Int64 => write!(f, "Int64"),
            SchemaType::Json => write!(f, "Json"),
        }
    }
}

impl std::str::FromStr for SchemaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bytes" => Ok(SchemaType::Bytes),
            "string" => Ok(SchemaType::String),
            "int64" => Ok(SchemaType::Int64),
            "json" => Ok(SchemaType::Json),
            _ => Err(format!("Unknown schema type: {}", s)),
        }
    }
}

/// Serialization kind plus the payload type it describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub schema_type: SchemaType,
    pub type_name: &'static str,
}

impl Schema {
    /// Schema for payload type `T`
    pub fn of<T: ?Sized>(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// JSON schema for payload type `T`
    pub fn json<T: ?Sized>() -> Self {
        Self::of::<T>(SchemaType::Json)
    }

    /// UTF-8 string payloads
    pub fn string() -> Self {
        Self::of::<String>(SchemaType::String)
    }

    /// Raw byte payloads
    pub fn bytes() -> Self {
        Self::of::<Vec<u8>>(SchemaType::Bytes)
    }

    pub fn encode(&self, value: &Value) -> OrchestratorResult<Vec<u8>> {
        self.schema_type.encode(value)
    }

    pub fn decode(&self, payload: &[u8]) -> OrchestratorResult<Value> {
        self.schema_type.decode(payload)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::bytes()
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<{}>", self.schema_type, self.type_name)
    }
}
