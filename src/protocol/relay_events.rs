use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Frames the relay originates towards the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// Mirror of a tool result the user is meant to see.
    #[serde(rename = "extension.middle_tier_tool_response")]
    ToolResponse {
        previous_item_id: Option<String>,
        tool_name: String,
        tool_result: String,
    },
    /// The session is ending because of an upstream failure.
    #[serde(rename = "error")]
    Error { error: ServerError },
}

impl RelayEvent {
    #[must_use]
    pub fn upstream_failure(message: impl Into<String>) -> Self {
        Self::Error {
            error: ServerError::relay("upstream_failure", message),
        }
    }
}
