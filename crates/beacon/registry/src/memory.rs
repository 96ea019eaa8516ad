//! In-memory registry with a call log and per-beacon fault injection.

use crate::api::{beacon_resource, RegistryApi};
use crate::model::{BeaconAttachment, ListBeaconsResponse, RegistryBeacon};
use crate::{RegistryError, RegistryResult};
use async_trait::async_trait;
use beacon_types::BeaconName;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Registry operation, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    ListBeacons,
    GetBeacon,
    ListAttachments,
    CreateAttachment,
    BatchDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCall {
    pub op: RegistryOp,
    pub beacon: Option<BeaconName>,
}

#[derive(Default)]
pub struct InMemoryRegistry {
    beacons: DashMap<BeaconName, RegistryBeacon>,
    attachments: DashMap<BeaconName, Vec<BeaconAttachment>>,
    faults: DashMap<(BeaconName, RegistryOp), String>,
    latency: DashMap<BeaconName, Duration>,
    calls: Mutex<Vec<RegistryCall>>,
    next_attachment: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active beacon owned by the caller.
    pub fn register_beacon(&self, name: &BeaconName) {
        self.beacons.insert(
            name.clone(),
            RegistryBeacon {
                beacon_name: beacon_resource(name),
                advertised_id: None,
                status: Some("ACTIVE".to_string()),
                description: None,
            },
        );
        self.attachments.entry(name.clone()).or_default();
    }

    /// Fail `op` on `name` with a 503 until cleared.
    pub fn fail(&self, name: &BeaconName, op: RegistryOp, reason: impl Into<String>) {
        self.faults.insert((name.clone(), op), reason.into());
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Delay every call touching `name`.
    pub fn delay(&self, name: &BeaconName, delay: Duration) {
        self.latency.insert(name.clone(), delay);
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn count_calls(&self, op: RegistryOp, name: &BeaconName) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.op == op && call.beacon.as_ref() == Some(name))
            .count()
    }

    /// Current attachments on a beacon, across namespaces.
    pub fn attachments(&self, name: &BeaconName) -> Vec<BeaconAttachment> {
        self.attachments
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn record(&self, op: RegistryOp, beacon: Option<&BeaconName>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RegistryCall {
                op,
                beacon: beacon.cloned(),
            });
        }
    }

    async fn enter(&self, op: RegistryOp, name: &BeaconName) -> RegistryResult<()> {
        self.record(op, Some(name));
        let delay = self.latency.get(name).map(|entry| *entry.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.faults.get(&(name.clone(), op)) {
            return Err(RegistryError::Api {
                status: 503,
                message: reason.value().clone(),
            });
        }
        if !self.beacons.contains_key(name) {
            return Err(RegistryError::NotFound(beacon_resource(name)));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryApi for InMemoryRegistry {
    async fn list_beacons(&self, _query: &str) -> RegistryResult<ListBeaconsResponse> {
        self.record(RegistryOp::ListBeacons, None);
        let mut beacons: Vec<RegistryBeacon> =
            self.beacons.iter().map(|entry| entry.value().clone()).collect();
        beacons.sort_by(|a, b| a.beacon_name.cmp(&b.beacon_name));
        Ok(ListBeaconsResponse {
            total_count: Some(beacons.len().to_string()),
            beacons,
            next_page_token: None,
        })
    }

    async fn get_beacon(&self, name: &BeaconName) -> RegistryResult<RegistryBeacon> {
        self.enter(RegistryOp::GetBeacon, name).await?;
        self.beacons
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(beacon_resource(name)))
    }

    async fn list_attachments(
        &self,
        name: &BeaconName,
        namespaced_type: &str,
    ) -> RegistryResult<Vec<BeaconAttachment>> {
        self.enter(RegistryOp::ListAttachments, name).await?;
        Ok(self
            .attachments(name)
            .into_iter()
            .filter(|a| a.namespaced_type == namespaced_type)
            .collect())
    }

    async fn create_attachment(
        &self,
        name: &BeaconName,
        attachment: &BeaconAttachment,
    ) -> RegistryResult<BeaconAttachment> {
        self.enter(RegistryOp::CreateAttachment, name).await?;
        let id = self.next_attachment.fetch_add(1, Ordering::SeqCst) + 1;
        let mut created = attachment.clone();
        created.attachment_name = Some(format!("{}/attachments/{id}", beacon_resource(name)));
        created.creation_time_ms = Some(id.to_string());
        self.attachments
            .entry(name.clone())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn batch_delete_attachments(
        &self,
        name: &BeaconName,
        namespaced_type: &str,
    ) -> RegistryResult<u64> {
        self.enter(RegistryOp::BatchDelete, name).await?;
        let mut entry = self.attachments.entry(name.clone()).or_default();
        let before = entry.len();
        entry.retain(|a| a.namespaced_type != namespaced_type);
        Ok((before - entry.len()) as u64)
    }
}
