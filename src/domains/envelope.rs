use base64::engine::general_purpose::STANDARD_NO_PAD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::domains::address::Id;
use crate::error::{RelayError, Result};

/// One relayed message as it travels over HTTP. The payload is carried as
/// unpadded standard base64 in `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub data: String,
}

impl Envelope {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            data: encode(payload),
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>> {
        decode(&self.data)
    }

    pub fn set_payload(&mut self, payload: &[u8]) {
        self.data = encode(payload);
    }

    pub fn from_id(&self) -> Result<Option<Id>> {
        optional_id(&self.from)
    }

    pub fn to_id(&self) -> Result<Option<Id>> {
        optional_id(&self.to)
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| RelayError::Serialization(e.to_string()))
    }
}

fn optional_id(value: &str) -> Result<Option<Id>> {
    if value.is_empty() {
        Ok(None)
    } else {
        Id::parse(value).map(Some)
    }
}

pub fn encode(payload: &[u8]) -> String {
    BASE64.encode(payload)
}

pub fn decode(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data.as_bytes())
        .map_err(|e| RelayError::Base64Decode(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub url: String,
    pub id: String,
}
