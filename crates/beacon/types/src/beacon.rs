use crate::{BeaconName, UserId};
use serde::{Deserialize, Serialize};

/// A beacon row. Keyed by `(user_id, name)`; an empty `deploy_name` means the
/// beacon is unassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub user_id: UserId,
    #[serde(default)]
    pub deploy_name: String,
    pub name: BeaconName,
}

impl Beacon {
    pub fn new(user_id: UserId, name: BeaconName) -> Self {
        Self {
            user_id,
            deploy_name: String::new(),
            name,
        }
    }

    pub fn assigned(user_id: UserId, name: BeaconName, deploy_name: impl Into<String>) -> Self {
        Self {
            user_id,
            deploy_name: deploy_name.into(),
            name,
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.deploy_name.is_empty()
    }

    pub fn key(&self) -> BeaconKey {
        BeaconKey {
            user_id: self.user_id,
            name: self.name.clone(),
        }
    }
}

/// Primary key of a beacon row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeaconKey {
    pub user_id: UserId,
    pub name: BeaconName,
}

impl BeaconKey {
    pub fn new(user_id: UserId, name: BeaconName) -> Self {
        Self { user_id, name }
    }
}
