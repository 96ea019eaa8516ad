//! Structural validation errors

use thiserror::Error;

/// Rejections raised before any write is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("deployment name must not be empty")]
    EmptyDeploymentName,

    #[error("deployment {deploy_name} references no message")]
    MissingMessage { deploy_name: String },

    #[error("message name must not be empty")]
    EmptyMessageName,

    #[error("message {0} has no owning user")]
    MissingMessageOwner(String),

    #[error("beacon name must not be empty")]
    EmptyBeaconName,

    #[error("invalid hex beacon name {value:?}: {reason}")]
    InvalidHex { value: String, reason: String },

    #[error("invalid attachment data: {0}")]
    InvalidAttachment(String),
}
