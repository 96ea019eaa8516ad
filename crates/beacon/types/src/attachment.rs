//! Attachment payload pushed to the beacon registry

use crate::ValidationError;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Title and URL surfaced to end users who encounter a beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentData {
    pub title: String,
    pub url: String,
}

impl AttachmentData {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }

    /// Registry wire form: standard base64 of the JSON object.
    pub fn encode(&self) -> Result<String, ValidationError> {
        let json =
            serde_json::to_vec(self).map_err(|e| ValidationError::InvalidAttachment(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn decode(data: &str) -> Result<Self, ValidationError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ValidationError::InvalidAttachment(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| ValidationError::InvalidAttachment(e.to_string()))
    }
}
