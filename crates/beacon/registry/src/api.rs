//! Registry API contract

use crate::model::{BeaconAttachment, ListBeaconsResponse, RegistryBeacon};
use crate::RegistryResult;
use async_trait::async_trait;
use beacon_types::BeaconName;

/// Prefix of every beacon resource name (`3` is the Eddystone id type).
pub const BEACON_PATH_PREFIX: &str = "beacons/3!";

/// Namespace the attachments are written under.
pub const DEFAULT_NAMESPACED_TYPE: &str = "com.google.nearby/en";

/// Filter for beacons the caller owns and that are live.
pub const ACTIVE_BEACONS_QUERY: &str = "status:active";

/// Resource name of a beacon at the registry boundary.
pub fn beacon_resource(name: &BeaconName) -> String {
    format!("{BEACON_PATH_PREFIX}{}", name.to_hex())
}

/// External beacon registry.
///
/// Built once per process and shared; implementations must be safe to call
/// concurrently.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn list_beacons(&self, query: &str) -> RegistryResult<ListBeaconsResponse>;

    async fn get_beacon(&self, name: &BeaconName) -> RegistryResult<RegistryBeacon>;

    async fn list_attachments(
        &self,
        name: &BeaconName,
        namespaced_type: &str,
    ) -> RegistryResult<Vec<BeaconAttachment>>;

    async fn create_attachment(
        &self,
        name: &BeaconName,
        attachment: &BeaconAttachment,
    ) -> RegistryResult<BeaconAttachment>;

    /// Delete every attachment under `namespaced_type`; returns how many went.
    async fn batch_delete_attachments(
        &self,
        name: &BeaconName,
        namespaced_type: &str,
    ) -> RegistryResult<u64>;
}
