//! Registry wire records (camelCase JSON).

use crate::RegistryResult;
use beacon_types::AttachmentData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedId {
    #[serde(rename = "type")]
    pub id_type: String,
    /// Base64 of the advertised id bytes.
    pub id: String,
}

/// A beacon as the registry reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryBeacon {
    /// Resource name, `beacons/3!<hex>`.
    pub beacon_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertised_id: Option<AdvertisedId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconAttachment {
    /// Assigned by the registry on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    pub namespaced_type: String,
    /// Base64 payload.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time_ms: Option<String>,
}

impl BeaconAttachment {
    /// A new attachment carrying `payload` under `namespaced_type`.
    pub fn encode(namespaced_type: impl Into<String>, payload: &AttachmentData) -> RegistryResult<Self> {
        Ok(Self {
            attachment_name: None,
            namespaced_type: namespaced_type.into(),
            data: payload.encode()?,
            creation_time_ms: None,
        })
    }

    pub fn payload(&self) -> RegistryResult<AttachmentData> {
        Ok(AttachmentData::decode(&self.data)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBeaconsResponse {
    #[serde(default)]
    pub beacons: Vec<RegistryBeacon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAttachmentsResponse {
    #[serde(default)]
    pub attachments: Vec<BeaconAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAttachmentsResponse {
    #[serde(default)]
    pub num_deleted: u64,
}
