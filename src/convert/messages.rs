use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::error::{ConversionError, ConversionResult};

/// Messages exchanged between the popup, the content side and the
/// background service. Wire shape: `{"action": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum HostMessage {
    ConvertText {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToggleEnabled {
        is_enabled: bool,
    },
}

impl HostMessage {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).with_context(|| format!("invalid host message: {raw}"))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode host message")
    }
}

/// Answer to a `convertText` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConvertReply {
    Converted { converted: String },
    Error { error: String },
}

impl ConvertReply {
    pub fn into_result(self) -> ConversionResult<String> {
        match self {
            ConvertReply::Converted { converted } => Ok(converted),
            ConvertReply::Error { error } => Err(ConversionError::Rejected(error)),
        }
    }
}

impl From<ConversionResult<String>> for ConvertReply {
    fn from(result: ConversionResult<String>) -> Self {
        match result {
            Ok(converted) => ConvertReply::Converted { converted },
            Err(err) => ConvertReply::Error {
                error: err.to_string(),
            },
        }
    }
}
