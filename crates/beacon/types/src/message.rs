//! Message records
//!
//! A message's `deployments` set is a reverse index of every deployment name
//! that currently points at it. It is maintained by explicit additive and
//! subtractive set updates, never by a foreign key, so it may drift from the
//! metadata rows when a multi-row write fails part way.

use crate::{UserId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_LANG: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip)]
    pub user_id: Option<UserId>,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub deployments: BTreeSet<String>,
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

impl Message {
    pub fn new(
        user_id: UserId,
        name: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id),
            name: name.into(),
            title: title.into(),
            url: url.into(),
            lang: default_lang(),
            deployments: BTreeSet::new(),
        }
    }

    /// Owning user, required before the message can be written.
    pub fn owner(&self) -> Result<UserId, ValidationError> {
        self.user_id
            .ok_or_else(|| ValidationError::MissingMessageOwner(self.name.clone()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyMessageName);
        }
        self.owner().map(|_| ())
    }

    pub fn is_deployed_as(&self, deploy_name: &str) -> bool {
        self.deployments.contains(deploy_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_json_omits_owner_and_defaults_lang() {
        let json = serde_json::json!({ "name": "m1", "title": "Hi", "url": "http://x" });
        let msg: Message = serde_json::from_value(json).unwrap();

        assert_eq!(msg.user_id, None);
        assert_eq!(msg.lang, "en");
        assert!(msg.deployments.is_empty());
        assert_eq!(
            msg.validate(),
            Err(ValidationError::MissingMessageOwner("m1".into()))
        );

        let out = serde_json::to_value(&msg).unwrap();
        assert!(out.get("user_id").is_none());
    }
}
