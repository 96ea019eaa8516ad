//! Deployment types
//!
//! `Deployment` is virtual: assembled on read from metadata, the beacon
//! index and the message row, and decomposed on write into those three.

use crate::{BeaconName, Message, UserId, ValidationError};
use serde::{Deserialize, Serialize};

/// A logical deployment: one message fanned out to a set of beacons.
///
/// On write, `message_name` refers to an existing message and takes
/// precedence; otherwise `message` describes a message to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub user_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default)]
    pub beacon_names: Vec<BeaconName>,
}

/// Where a deployment's message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource<'a> {
    Existing(&'a str),
    New(&'a Message),
}

impl Deployment {
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            message_name: None,
            message: None,
            beacon_names: Vec::new(),
        }
    }

    pub fn with_message_name(mut self, message_name: impl Into<String>) -> Self {
        self.message_name = Some(message_name.into());
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_beacons(mut self, beacon_names: impl IntoIterator<Item = BeaconName>) -> Self {
        self.beacon_names = beacon_names.into_iter().collect();
        self
    }

    pub fn message_source(&self) -> Result<MessageSource<'_>, ValidationError> {
        match (self.message_name.as_deref(), self.message.as_ref()) {
            (Some(name), _) if !name.is_empty() => Ok(MessageSource::Existing(name)),
            (_, Some(message)) if !message.name.is_empty() => Ok(MessageSource::New(message)),
            (_, Some(_)) => Err(ValidationError::EmptyMessageName),
            _ => Err(ValidationError::MissingMessage {
                deploy_name: self.name.clone(),
            }),
        }
    }

    /// Structural checks run before any write.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyDeploymentName);
        }
        if self.beacon_names.iter().any(BeaconName::is_empty) {
            return Err(ValidationError::EmptyBeaconName);
        }
        self.message_source().map(|_| ())
    }

    pub fn metadata(&self, message_name: impl Into<String>) -> DeploymentMetadata {
        DeploymentMetadata {
            user_id: self.user_id,
            deploy_name: self.name.clone(),
            message_name: message_name.into(),
        }
    }
}

/// Authoritative `(user_id, deploy_name) -> message_name` binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    pub user_id: UserId,
    #[serde(rename = "name")]
    pub deploy_name: String,
    pub message_name: String,
}

impl DeploymentMetadata {
    pub fn new(
        user_id: UserId,
        deploy_name: impl Into<String>,
        message_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            deploy_name: deploy_name.into(),
            message_name: message_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        "6ba7b810-9dad-11d1-80b4-00c04fd430c9".parse().unwrap()
    }

    #[test]
    fn request_json_decodes_hex_beacons() {
        let json = serde_json::json!({
            "user_id": "6ba7b810-9dad-11d1-80b4-00c04fd430c9",
            "name": "promo1",
            "message": { "name": "m1", "title": "Hi", "url": "http://x" },
            "beacon_names": ["aa11", "bb22"]
        });
        let dep: Deployment = serde_json::from_value(json).unwrap();

        assert_eq!(dep.user_id, user());
        assert_eq!(dep.beacon_names[0].as_bytes(), &[0xaa, 0x11]);
        assert_eq!(dep.beacon_names[1].as_bytes(), &[0xbb, 0x22]);
        assert!(matches!(dep.message_source(), Ok(MessageSource::New(m)) if m.name == "m1"));

        let out = serde_json::to_value(&dep).unwrap();
        assert_eq!(out["beacon_names"], serde_json::json!(["aa11", "bb22"]));
        assert!(out.get("message_name").is_none());
    }

    #[test]
    fn message_name_takes_precedence() {
        let dep = Deployment::new(user(), "promo1")
            .with_message_name("existing")
            .with_message(Message::new(user(), "fresh", "t", "u"));
        assert_eq!(dep.message_source(), Ok(MessageSource::Existing("existing")));
    }

    #[test]
    fn empty_message_name_falls_back_to_new_message() {
        let dep = Deployment::new(user(), "promo1")
            .with_message_name("")
            .with_message(Message::new(user(), "fresh", "t", "u"));
        assert!(matches!(dep.message_source(), Ok(MessageSource::New(_))));
    }

    #[test]
    fn validation_rejects_missing_parts() {
        assert_eq!(
            Deployment::new(user(), "").with_message_name("m").validate(),
            Err(ValidationError::EmptyDeploymentName)
        );
        assert_eq!(
            Deployment::new(user(), "promo1").validate(),
            Err(ValidationError::MissingMessage {
                deploy_name: "promo1".into()
            })
        );
        assert_eq!(
            Deployment::new(user(), "promo1")
                .with_message_name("m")
                .with_beacons([BeaconName::new(Vec::new())])
                .validate(),
            Err(ValidationError::EmptyBeaconName)
        );
    }

    #[test]
    fn metadata_serializes_deploy_name_as_name() {
        let meta = DeploymentMetadata::new(user(), "promo1", "m1");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["name"], "promo1");
        assert_eq!(json["message_name"], "m1");
    }
}
