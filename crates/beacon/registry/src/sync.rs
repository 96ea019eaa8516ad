//! Declarative attachment reconciliation
//!
//! The registry has no replace primitive, so the desired state of a beacon is
//! reached by deleting every attachment in the namespace and then creating the
//! one wanted. Delete always runs before create; that ordering is what makes
//! repeated calls converge instead of accumulating attachments.

use crate::api::{RegistryApi, ACTIVE_BEACONS_QUERY};
use crate::config::RegistryConfig;
use crate::model::{BeaconAttachment, ListBeaconsResponse, RegistryBeacon};
use crate::{RegistryError, RegistryResult};
use beacon_dispatch::{DispatchLimit, Dispatcher};
use beacon_types::{AttachmentData, BeaconName};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome for one beacon of a [`RegistrySynchronizer::declarative_attach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentResult {
    pub name: BeaconName,
    /// `Ok(None)` when only the delete was requested.
    pub outcome: RegistryResult<Option<BeaconAttachment>>,
}

impl AttachmentResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&RegistryError> {
        self.outcome.as_ref().err()
    }

    pub fn attachment(&self) -> Option<&BeaconAttachment> {
        self.outcome.as_ref().ok().and_then(Option::as_ref)
    }
}

impl Serialize for AttachmentResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AttachmentResult", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("error", &self.error().map(ToString::to_string))?;
        state.serialize_field("attachment", &self.attachment())?;
        state.end()
    }
}

/// Applies desired attachment state to beacons in the registry.
#[derive(Clone)]
pub struct RegistrySynchronizer {
    api: Arc<dyn RegistryApi>,
    namespaced_type: String,
    short_link_base: String,
    short_suffix_len: usize,
    limit: DispatchLimit,
}

impl RegistrySynchronizer {
    pub fn new(api: Arc<dyn RegistryApi>, config: &RegistryConfig) -> Self {
        Self {
            api,
            namespaced_type: config.namespaced_type.clone(),
            short_link_base: config.short_link_base.clone(),
            short_suffix_len: config.short_suffix_len,
            limit: DispatchLimit::unbounded(),
        }
    }

    /// Cap concurrent per-beacon registry work.
    pub fn with_dispatch_limit(mut self, limit: DispatchLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn api(&self) -> &Arc<dyn RegistryApi> {
        &self.api
    }

    /// Short link written into a beacon's attachment: the configured base plus
    /// the hex of the identifier's trailing bytes.
    pub fn short_link(&self, name: &BeaconName) -> String {
        format!(
            "{}{}",
            self.short_link_base,
            hex::encode(name.suffix(self.short_suffix_len))
        )
    }

    /// Make each beacon carry exactly the attachment described by `payload`,
    /// or none when `payload` is `None`.
    ///
    /// Beacons are processed concurrently and independently. The result has
    /// one entry per input, in input order.
    #[instrument(skip(self, names, payload), fields(beacons = names.len(), delete_only = payload.is_none()))]
    pub async fn declarative_attach(
        &self,
        names: &[BeaconName],
        payload: Option<&AttachmentData>,
    ) -> Vec<AttachmentResult> {
        let mut dispatch = Dispatcher::with_limit(self.limit.clone());
        for (index, name) in names.iter().enumerate() {
            let sync = self.clone();
            let name = name.clone();
            let desired = payload.map(|p| AttachmentData::new(p.title.clone(), self.short_link(&name)));
            dispatch.register(async move {
                let outcome = sync.reconcile_one(&name, desired.as_ref()).await;
                if let Err(err) = &outcome {
                    warn!(beacon = %name, error = %err, "attachment reconciliation failed");
                }
                (index, AttachmentResult { name, outcome })
            });
        }

        let mut results = dispatch.collect().await;
        results.sort_unstable_by_key(|(index, _)| *index);
        let mut results: Vec<AttachmentResult> = results.into_iter().map(|(_, r)| r).collect();

        // A cancelled task leaves no result; report it rather than drop the beacon.
        if results.len() != names.len() {
            let seen: Vec<BeaconName> = results.iter().map(|r| r.name.clone()).collect();
            for name in names.iter().filter(|n| !seen.contains(n)) {
                results.push(AttachmentResult {
                    name: name.clone(),
                    outcome: Err(RegistryError::Transport(
                        "reconciliation task did not complete".to_string(),
                    )),
                });
            }
        }
        results
    }

    async fn reconcile_one(
        &self,
        name: &BeaconName,
        desired: Option<&AttachmentData>,
    ) -> RegistryResult<Option<BeaconAttachment>> {
        let deleted = self
            .api
            .batch_delete_attachments(name, &self.namespaced_type)
            .await?;
        debug!(beacon = %name, deleted, "cleared attachments");

        let Some(desired) = desired else {
            return Ok(None);
        };
        let attachment = BeaconAttachment::encode(self.namespaced_type.clone(), desired)?;
        self.api.create_attachment(name, &attachment).await.map(Some)
    }

    /// Registry view of several beacons; the i-th result belongs to `names[i]`.
    pub async fn get_beacons_by_names(
        &self,
        names: &[BeaconName],
    ) -> Vec<RegistryResult<RegistryBeacon>> {
        let mut dispatch = Dispatcher::with_limit(self.limit.clone());
        for (index, name) in names.iter().enumerate() {
            let api = self.api.clone();
            let name = name.clone();
            dispatch.register(async move { (index, api.get_beacon(&name).await) });
        }

        let mut slots: Vec<Option<RegistryResult<RegistryBeacon>>> =
            std::iter::repeat_with(|| None).take(names.len()).collect();
        for (index, result) in dispatch.collect().await {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(RegistryError::Transport("lookup did not complete".to_string()))
                })
            })
            .collect()
    }

    /// Active beacons owned by the caller.
    pub async fn list_owned_beacons(&self) -> RegistryResult<ListBeaconsResponse> {
        self.api.list_beacons(ACTIVE_BEACONS_QUERY).await
    }

    pub async fn list_attachments(&self, name: &BeaconName) -> RegistryResult<Vec<BeaconAttachment>> {
        self.api.list_attachments(name, &self.namespaced_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryRegistry, RegistryOp};
    use proptest::prelude::*;
    use std::time::Duration;

    fn name(hex: &str) -> BeaconName {
        BeaconName::from_hex(hex).unwrap()
    }

    fn setup(names: &[BeaconName]) -> (Arc<InMemoryRegistry>, RegistrySynchronizer) {
        let registry = Arc::new(InMemoryRegistry::new());
        for name in names {
            registry.register_beacon(name);
        }
        let sync = RegistrySynchronizer::new(registry.clone(), &RegistryConfig::default());
        (registry, sync)
    }

    #[test]
    fn short_link_uses_trailing_six_bytes() {
        let (_, sync) = setup(&[]);
        let beacon = name("00112233445566778899aabbccddeeff");
        assert_eq!(sync.short_link(&beacon), "https://our.sharecro.ws/bkn/aabbccddeeff");
        assert_eq!(sync.short_link(&name("aa11")), "https://our.sharecro.ws/bkn/aa11");
    }

    #[tokio::test]
    async fn repeated_attach_converges_to_one_attachment() {
        let beacons = vec![name("aa11"), name("bb22")];
        let (registry, sync) = setup(&beacons);
        let payload = AttachmentData::new("Hi", "http://x");

        for _ in 0..2 {
            let results = sync.declarative_attach(&beacons, Some(&payload)).await;
            assert!(results.iter().all(AttachmentResult::is_ok));
        }

        for beacon in &beacons {
            let attachments = sync.list_attachments(beacon).await.unwrap();
            assert_eq!(attachments.len(), 1);
            let data = attachments[0].payload().unwrap();
            assert_eq!(data.title, "Hi");
            assert_eq!(data.url, sync.short_link(beacon));
            assert_eq!(registry.count_calls(RegistryOp::BatchDelete, beacon), 2);
        }
    }

    #[tokio::test]
    async fn no_payload_only_deletes() {
        let beacons = vec![name("aa11")];
        let (registry, sync) = setup(&beacons);
        sync.declarative_attach(&beacons, Some(&AttachmentData::new("Hi", "http://x")))
            .await;

        let results = sync.declarative_attach(&beacons, None).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Ok(None));
        assert!(registry.attachments(&beacons[0]).is_empty());
        assert_eq!(registry.count_calls(RegistryOp::CreateAttachment, &beacons[0]), 1);
    }

    #[tokio::test]
    async fn one_failing_beacon_does_not_block_others() {
        let beacons = vec![name("aa11"), name("bb22"), name("cc33")];
        let (registry, sync) = setup(&beacons);
        registry.fail(&beacons[1], RegistryOp::CreateAttachment, "quota");

        let results = sync
            .declarative_attach(&beacons, Some(&AttachmentData::new("Hi", "http://x")))
            .await;

        assert!(results[0].attachment().is_some());
        assert!(matches!(
            results[1].error(),
            Some(RegistryError::Api { status: 503, .. })
        ));
        assert!(results[2].attachment().is_some());
    }

    #[tokio::test]
    async fn failed_delete_skips_create() {
        let beacons = vec![name("aa11")];
        let (registry, sync) = setup(&beacons);
        registry.fail(&beacons[0], RegistryOp::BatchDelete, "unavailable");

        let results = sync
            .declarative_attach(&beacons, Some(&AttachmentData::new("Hi", "http://x")))
            .await;
        assert!(results[0].error().is_some());
        assert_eq!(registry.count_calls(RegistryOp::CreateAttachment, &beacons[0]), 0);
    }

    #[tokio::test]
    async fn results_serialize_with_hex_names() {
        let beacons = vec![name("aa11"), name("ffff")];
        let (_, sync) = setup(&beacons[..1]);

        let results = sync.declarative_attach(&beacons, None).await;
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json[0]["name"], "aa11");
        assert!(json[0]["error"].is_null());
        assert!(json[0]["attachment"].is_null());
        assert_eq!(json[1]["name"], "ffff");
        assert!(json[1]["error"].is_string());
    }

    #[tokio::test]
    async fn get_beacons_by_names_keeps_input_order() {
        let beacons = vec![name("aa11"), name("bb22")];
        let (registry, sync) = setup(&beacons);
        registry.delay(&beacons[0], Duration::from_millis(10));

        let lookup = vec![name("aa11"), name("dead"), name("bb22")];
        let results = sync.get_beacons_by_names(&lookup).await;
        assert_eq!(results[0].as_ref().unwrap().beacon_name, "beacons/3!aa11");
        assert!(matches!(results[1], Err(RegistryError::NotFound(_))));
        assert_eq!(results[2].as_ref().unwrap().beacon_name, "beacons/3!bb22");
        assert_eq!(sync.list_owned_beacons().await.unwrap().beacons.len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// One result per input beacon, correlated by name, whatever the
        /// per-beacon latencies.
        #[test]
        fn one_result_per_input_in_input_order(
            raw in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 1..8), 0..12),
            delays in prop::collection::vec(0u64..5, 12),
        ) {
            let beacons: Vec<BeaconName> = raw.into_iter().map(BeaconName::new).collect();
            let (registry, sync) = setup(&beacons);
            for (beacon, delay) in beacons.iter().zip(&delays) {
                registry.delay(beacon, Duration::from_millis(*delay));
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let results = runtime.block_on(
                sync.declarative_attach(&beacons, Some(&AttachmentData::new("t", "u"))),
            );

            prop_assert_eq!(results.len(), beacons.len());
            for (result, beacon) in results.iter().zip(&beacons) {
                prop_assert_eq!(&result.name, beacon);
                prop_assert!(result.is_ok());
            }
        }
    }
}
