//! Strongly-typed identifiers
//!
//! User ids are UUIDs; beacon names are opaque registry-assigned byte strings
//! exchanged as lowercase hex at every JSON boundary.

use crate::ValidationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Deterministic id for an external login: the same provider and provider
    /// key always yield the same user, so repeated logins upsert one row.
    pub fn from_provider(provider: Provider, provider_key: &[u8]) -> Self {
        Self(Uuid::new_v5(&provider.namespace(), provider_key))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// External identity providers a user can log in with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
}

impl Provider {
    /// Stable numeric id persisted alongside the user.
    pub fn id(self) -> u8 {
        match self {
            Provider::Google => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Provider::Google),
            _ => None,
        }
    }

    /// Name-based namespace under which provider keys are hashed.
    pub fn namespace(self) -> Uuid {
        Uuid::new_v5(&Uuid::nil(), &[self.id()])
    }
}

/// Registry-assigned beacon identifier (raw bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeaconName(Vec<u8>);

impl BeaconName {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self(raw.into())
    }

    pub fn from_hex(value: &str) -> Result<Self, ValidationError> {
        hex::decode(value)
            .map(Self)
            .map_err(|e| ValidationError::InvalidHex {
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Trailing `len` bytes of the identifier, or all of it when shorter.
    pub fn suffix(&self, len: usize) -> &[u8] {
        let start = self.0.len().saturating_sub(len);
        &self.0[start..]
    }
}

impl fmt::Display for BeaconName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for BeaconName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<Vec<u8>> for BeaconName {
    fn from(raw: Vec<u8>) -> Self {
        Self(raw)
    }
}

impl Serialize for BeaconName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BeaconName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}
