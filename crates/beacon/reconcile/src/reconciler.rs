//! Deployment reconciler
//!
//! Composes storage writes with registry reconciliation. Storage and registry
//! are updated independently: a storage write that lands is not undone when
//! the registry step fails, and the per-beacon registry outcomes are reported
//! back for the caller to retry.

use crate::config::{ReconcileConfig, StorageConfig};
use crate::{ReconcileError, ReconcileResult};
use beacon_dispatch::{DispatchLimit, Dispatcher};
use beacon_registry::{AttachmentResult, HttpRegistryClient, RegistrySynchronizer};
use beacon_storage::{InMemorySession, Session, StorageClient};
use beacon_types::{AttachmentData, Beacon, BeaconName, Deployment, UserId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of [`Reconciler::deploy`].
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub deployment: Deployment,
    pub attachments: Vec<AttachmentResult>,
}

impl DeployReport {
    pub fn failed_beacons(&self) -> Vec<&BeaconName> {
        self.attachments
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| &r.name)
            .collect()
    }
}

/// Result of [`Reconciler::change_deployments`]. Partial success is normal.
#[derive(Debug, Default)]
pub struct ChangeReport {
    /// Beacons now carrying their new deployment's attachment.
    pub attached: Vec<BeaconName>,
    /// Unassigned beacons whose attachments were cleared.
    pub detached: Vec<BeaconName>,
    pub errors: Vec<ReconcileError>,
}

impl ChangeReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct GroupOutcome {
    attached: Vec<BeaconName>,
    errors: Vec<ReconcileError>,
}

/// Deployment reconciler over shared storage and registry handles.
#[derive(Clone)]
pub struct Reconciler {
    storage: StorageClient,
    registry: RegistrySynchronizer,
}

impl Reconciler {
    pub fn new(storage: StorageClient, registry: RegistrySynchronizer) -> Self {
        Self { storage, registry }
    }

    /// Build the process-wide storage session and registry client.
    pub async fn from_config(config: &ReconcileConfig) -> ReconcileResult<Self> {
        let limit = DispatchLimit::from_config(&config.dispatch);
        let session = open_session(&config.storage).await?;
        let api = Arc::new(HttpRegistryClient::new(&config.registry)?);

        let storage = StorageClient::new(session).with_dispatch_limit(limit.clone());
        let registry = RegistrySynchronizer::new(api, &config.registry).with_dispatch_limit(limit);
        info!(bounded = config.dispatch.max_in_flight.is_some(), "reconciler ready");
        Ok(Self::new(storage, registry))
    }

    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    pub fn registry(&self) -> &RegistrySynchronizer {
        &self.registry
    }

    /// Post a deployment, then attach its message to every beacon in it.
    ///
    /// Storage failures are returned as errors. Registry failures are per
    /// beacon and reported in the result.
    #[instrument(skip(self, deployment), fields(user_id = %deployment.user_id, deploy_name = %deployment.name))]
    pub async fn deploy(&self, deployment: Deployment) -> ReconcileResult<DeployReport> {
        deployment.validate()?;
        let deployment = self.storage.post_deployment(deployment).await?;

        let payload = deployment
            .message
            .as_ref()
            .map(|m| AttachmentData::new(m.title.clone(), m.url.clone()))
            .ok_or_else(|| ReconcileError::UnboundDeployment(deployment.name.clone()))?;
        let attachments = self
            .registry
            .declarative_attach(&deployment.beacon_names, Some(&payload))
            .await;

        let report = DeployReport {
            deployment,
            attachments,
        };
        info!(
            beacons = report.attachments.len(),
            failed = report.failed_beacons().len(),
            "deployment reconciled"
        );
        Ok(report)
    }

    /// Reassign beacons between deployments.
    ///
    /// Beacons with an empty `deploy_name` are unassigned and have their
    /// attachments cleared. The rest are grouped by target deployment; each
    /// group resolves its deployment's message, is written, and is attached.
    /// A failing group is reported and does not stop the others. Inside a
    /// group, a beacon whose storage write fails is reported on its own and
    /// only skips its own registry step.
    #[instrument(skip(self, beacons), fields(user_id = %user_id, beacons = beacons.len()))]
    pub async fn change_deployments(&self, user_id: UserId, beacons: Vec<Beacon>) -> ChangeReport {
        let mut removals = Vec::new();
        let mut groups: BTreeMap<String, Vec<Beacon>> = BTreeMap::new();
        for mut beacon in beacons {
            // Ownership comes from the authenticated caller, never the payload.
            beacon.user_id = user_id;
            if beacon.is_assigned() {
                groups
                    .entry(beacon.deploy_name.clone())
                    .or_default()
                    .push(beacon);
            } else {
                removals.push(beacon);
            }
        }

        let mut report = ChangeReport::default();
        if !removals.is_empty() {
            self.detach(removals, &mut report).await;
        }

        let mut dispatch = Dispatcher::new();
        for (index, (deploy_name, members)) in groups.into_iter().enumerate() {
            let this = self.clone();
            dispatch.register(async move {
                (index, this.reassign_group(user_id, &deploy_name, members).await)
            });
        }
        let mut outcomes = dispatch.collect().await;
        outcomes.sort_unstable_by_key(|(index, _)| *index);
        for (_, outcome) in outcomes {
            report.attached.extend(outcome.attached);
            report.errors.extend(outcome.errors);
        }

        info!(
            attached = report.attached.len(),
            detached = report.detached.len(),
            errors = report.errors.len(),
            "deployments changed"
        );
        report
    }

    async fn detach(&self, removals: Vec<Beacon>, report: &mut ChangeReport) {
        let names = self.write_assignments(removals, &mut report.errors).await;
        if names.is_empty() {
            return;
        }
        for result in self.registry.declarative_attach(&names, None).await {
            collect_result(result, &mut report.detached, &mut report.errors);
        }
    }

    async fn reassign_group(
        &self,
        user_id: UserId,
        deploy_name: &str,
        members: Vec<Beacon>,
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();
        let payload = match self.resolve_payload(user_id, deploy_name).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(deploy_name, error = %err, "skipping deployment group");
                outcome.errors.push(err.in_group(deploy_name));
                return outcome;
            }
        };

        let names = self.write_assignments(members, &mut outcome.errors).await;
        if names.is_empty() {
            return outcome;
        }
        for result in self.registry.declarative_attach(&names, Some(&payload)).await {
            collect_result(result, &mut outcome.attached, &mut outcome.errors);
        }
        outcome
    }

    /// Store each beacon's `deploy_name`. Returns the beacons that were
    /// written, in input order; the rest are pushed onto `errors`.
    async fn write_assignments(
        &self,
        beacons: Vec<Beacon>,
        errors: &mut Vec<ReconcileError>,
    ) -> Vec<BeaconName> {
        let results = self.storage.assign_beacons(&beacons).await;
        let mut written = Vec::with_capacity(beacons.len());
        for (beacon, result) in beacons.into_iter().zip(results) {
            match result {
                Ok(()) => written.push(beacon.name),
                Err(source) => {
                    warn!(beacon = %beacon.name, error = %source, "storing beacon assignment failed");
                    errors.push(ReconcileError::BeaconStorage {
                        name: beacon.name,
                        source,
                    });
                }
            }
        }
        written
    }

    async fn resolve_payload(
        &self,
        user_id: UserId,
        deploy_name: &str,
    ) -> ReconcileResult<AttachmentData> {
        let metadata = self
            .storage
            .fetch_deployment_metadata(&user_id, deploy_name)
            .await?;
        if metadata.message_name.is_empty() {
            return Err(ReconcileError::UnboundDeployment(deploy_name.to_string()));
        }
        let message = self
            .storage
            .fetch_message(&user_id, &metadata.message_name)
            .await?;
        Ok(AttachmentData::new(message.title, message.url))
    }
}

fn collect_result(
    result: AttachmentResult,
    succeeded: &mut Vec<BeaconName>,
    errors: &mut Vec<ReconcileError>,
) {
    match result.outcome {
        Ok(_) => succeeded.push(result.name),
        Err(source) => errors.push(ReconcileError::Beacon {
            name: result.name,
            source,
        }),
    }
}

async fn open_session(config: &StorageConfig) -> ReconcileResult<Arc<dyn Session>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemorySession::new())),
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let session = beacon_storage::postgres::PostgresSession::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            Ok(Arc::new(session))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(ReconcileError::Config(
            "postgres storage requires the `postgres` feature".to_string(),
        )),
    }
}
