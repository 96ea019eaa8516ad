//! Deployment write and read orchestration
//!
//! A deployment is stored denormalized across three structures: the message's
//! `deployments` set, the `deploy_name` column of each beacon row, and the
//! metadata row. Writes fan out to all three without a transaction; reads
//! merge the metadata row with the beacon index.

use crate::client::StorageClient;
use crate::StorageResult;
use beacon_dispatch::Dispatcher;
use beacon_types::{Beacon, Deployment, Message, MessageSource, UserId};
use std::collections::BTreeSet;
use tracing::{info, instrument};

impl StorageClient {
    /// Write a deployment.
    ///
    /// An existing message named by `message_name` is fetched first; if that
    /// fails nothing is written. Then three writes run concurrently: link the
    /// message to the deployment, assign every beacon, upsert the metadata row.
    /// The first error is returned and writes that already went through are
    /// left in place.
    #[instrument(skip(self, deployment), fields(user_id = %deployment.user_id, deploy_name = %deployment.name))]
    pub async fn post_deployment(&self, mut deployment: Deployment) -> StorageResult<Deployment> {
        deployment.validate()?;
        let user_id = deployment.user_id;
        let deploy_name = deployment.name.clone();

        let (link, mut message) = match deployment.message_source()? {
            MessageSource::Existing(name) => {
                let message = self.fetch_message(&user_id, name).await?;
                let link = LinkWrite::Add {
                    name: message.name.clone(),
                    deploy_name: deploy_name.clone(),
                };
                (link, message)
            }
            MessageSource::New(message) => {
                let mut message = message.clone();
                message.user_id = Some(user_id);
                message.deployments = BTreeSet::from([deploy_name.clone()]);
                (LinkWrite::Create(message.clone()), message)
            }
        };
        let message_name = message.name.clone();

        let beacons: Vec<Beacon> = deployment
            .beacon_names
            .iter()
            .map(|name| Beacon::assigned(user_id, name.clone(), deploy_name.clone()))
            .collect();
        let metadata = deployment.metadata(message_name.clone());

        // Three branches of one request; leaf fan-outs below them take the
        // shared limit, so this level stays unbounded.
        let mut dispatch = Dispatcher::new();
        let client = self.clone();
        dispatch.register(async move {
            match link {
                LinkWrite::Add { name, deploy_name } => client
                    .add_message_deployments(user_id, &name, &[deploy_name], None)
                    .await
                    .map(|_| ()),
                LinkWrite::Create(message) => client.create_message(&message, None).await.map(|_| ()),
            }
        });
        let client = self.clone();
        dispatch.register(async move { client.update_beacons(&beacons).await });
        let client = self.clone();
        dispatch.register(async move {
            client
                .post_deployment_metadata(&metadata, None)
                .await
                .map(|_| ())
        });
        dispatch.first_error().await?;

        message.deployments.insert(deploy_name);
        deployment.message_name = Some(message_name);
        deployment.message = Some(message);

        info!(
            message_name = deployment.message_name.as_deref().unwrap_or_default(),
            beacons = deployment.beacon_names.len(),
            "deployment posted"
        );
        Ok(deployment)
    }

    /// Read a deployment: its metadata row and beacon index, fetched
    /// concurrently and merged.
    pub async fn fetch_deployment(
        &self,
        user_id: &UserId,
        deploy_name: &str,
    ) -> StorageResult<Deployment> {
        let (metadata, beacons) = tokio::try_join!(
            self.fetch_deployment_metadata(user_id, deploy_name),
            self.fetch_deployment_beacons(user_id, deploy_name),
        )?;
        Ok(Deployment::new(*user_id, metadata.deploy_name)
            .with_message_name(metadata.message_name)
            .with_beacons(beacons.into_iter().map(|b| b.name)))
    }

    /// Every deployment of a user (first page), in metadata order.
    pub async fn fetch_deployments(&self, user_id: &UserId) -> StorageResult<Vec<Deployment>> {
        let metadata = self.fetch_deployments_metadata(user_id).await?;

        let mut dispatch = self.row_dispatcher();
        for (index, meta) in metadata.iter().enumerate() {
            let client = self.clone();
            let user_id = *user_id;
            let deploy_name = meta.deploy_name.clone();
            dispatch.register(async move {
                client
                    .fetch_deployment_beacons(&user_id, &deploy_name)
                    .await
                    .map(|beacons| (index, beacons))
            });
        }
        let mut indexed = dispatch.first_error().await?;
        indexed.sort_unstable_by_key(|(index, _)| *index);

        let mut beacons_by_index = indexed.into_iter().map(|(_, beacons)| beacons);
        Ok(metadata
            .into_iter()
            .map(|meta| {
                let beacons = beacons_by_index.next().unwrap_or_default();
                Deployment::new(meta.user_id, meta.deploy_name)
                    .with_message_name(meta.message_name)
                    .with_beacons(beacons.into_iter().map(|b| b.name))
            })
            .collect())
    }
}

/// Message branch of a deployment write.
enum LinkWrite {
    Add { name: String, deploy_name: String },
    Create(Message),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySession;
    use crate::statement::Table;
    use crate::StorageError;
    use beacon_types::{BeaconKey, BeaconName, DeploymentMetadata};
    use std::sync::Arc;
    use std::time::Duration;

    fn name(hex: &str) -> BeaconName {
        BeaconName::from_hex(hex).unwrap()
    }

    async fn seeded() -> (Arc<InMemorySession>, StorageClient, UserId) {
        let session = Arc::new(InMemorySession::new());
        let client = StorageClient::new(session.clone());
        let user_id = UserId::generate();
        client
            .create_beacons(
                &[Beacon::new(user_id, name("aa11")), Beacon::new(user_id, name("bb22"))],
                None,
            )
            .await
            .unwrap();
        (session, client, user_id)
    }

    #[tokio::test]
    async fn new_message_deployment_writes_all_three_structures() {
        let (_, client, user_id) = seeded().await;
        let deployment = Deployment::new(user_id, "promo1")
            .with_message(Message::new(user_id, "m1", "Hi", "http://x"))
            .with_beacons([name("aa11"), name("bb22")]);

        let posted = client.post_deployment(deployment).await.unwrap();
        assert_eq!(posted.message_name.as_deref(), Some("m1"));

        let message = client.fetch_message(&user_id, "m1").await.unwrap();
        assert_eq!(message.deployments, BTreeSet::from(["promo1".to_string()]));
        for hex in ["aa11", "bb22"] {
            let beacon = client
                .fetch_beacon(&BeaconKey::new(user_id, name(hex)))
                .await
                .unwrap();
            assert_eq!(beacon.deploy_name, "promo1");
        }
        let metadata = client
            .fetch_deployment_metadata(&user_id, "promo1")
            .await
            .unwrap();
        assert_eq!(metadata, DeploymentMetadata::new(user_id, "promo1", "m1"));
    }

    #[tokio::test]
    async fn existing_message_gains_the_deployment_name() {
        let (_, client, user_id) = seeded().await;
        client
            .create_message(&Message::new(user_id, "m1", "Hi", "http://x"), None)
            .await
            .unwrap();

        let posted = client
            .post_deployment(
                Deployment::new(user_id, "promo2")
                    .with_message_name("m1")
                    .with_beacons([name("aa11")]),
            )
            .await
            .unwrap();

        assert!(posted.message.as_ref().unwrap().is_deployed_as("promo2"));
        let stored = client.fetch_message(&user_id, "m1").await.unwrap();
        assert!(stored.is_deployed_as("promo2"));
    }

    #[tokio::test]
    async fn unknown_message_name_writes_nothing() {
        let (session, client, user_id) = seeded().await;
        let before = session.total_applied_writes();

        let result = client
            .post_deployment(
                Deployment::new(user_id, "promo1")
                    .with_message_name("missing")
                    .with_beacons([name("aa11")]),
            )
            .await;

        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(session.total_applied_writes(), before);
        assert!(!client
            .fetch_beacon(&BeaconKey::new(user_id, name("aa11")))
            .await
            .unwrap()
            .is_assigned());
    }

    #[tokio::test]
    async fn validation_failure_writes_nothing() {
        let (session, client, user_id) = seeded().await;
        let before = session.total_applied_writes();

        let result = client
            .post_deployment(Deployment::new(user_id, "promo1").with_beacons([name("aa11")]))
            .await;

        assert!(matches!(result, Err(StorageError::Validation(_))));
        assert_eq!(session.total_applied_writes(), before);
    }

    #[tokio::test]
    async fn failed_branch_does_not_roll_back_the_others() {
        let (session, client, user_id) = seeded().await;
        session.fail_table(Table::DeploymentsMetadata, "unavailable");

        let result = client
            .post_deployment(
                Deployment::new(user_id, "promo1")
                    .with_message(Message::new(user_id, "m1", "Hi", "http://x"))
                    .with_beacons([name("aa11")]),
            )
            .await;
        assert!(matches!(result, Err(StorageError::Backend(_))));

        // Give detached siblings a chance to land before inspecting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.clear_faults();

        assert!(client.fetch_message(&user_id, "m1").await.is_ok());
        let beacon = client
            .fetch_beacon(&BeaconKey::new(user_id, name("aa11")))
            .await
            .unwrap();
        assert_eq!(beacon.deploy_name, "promo1");
        assert!(client
            .fetch_deployment_metadata(&user_id, "promo1")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn fetch_deployment_is_independent_of_completion_order() {
        let (session, client, user_id) = seeded().await;
        client
            .post_deployment(
                Deployment::new(user_id, "promo1")
                    .with_message(Message::new(user_id, "m1", "Hi", "http://x"))
                    .with_beacons([name("bb22"), name("aa11")]),
            )
            .await
            .unwrap();

        session.delay_table(Table::DeploymentsMetadata, Duration::from_millis(15));
        let metadata_last = client.fetch_deployment(&user_id, "promo1").await.unwrap();
        session.clear_latency();

        session.delay_table(Table::BeaconDeployments, Duration::from_millis(15));
        let index_last = client.fetch_deployment(&user_id, "promo1").await.unwrap();

        assert_eq!(metadata_last, index_last);
        assert_eq!(metadata_last.message_name.as_deref(), Some("m1"));
        assert_eq!(metadata_last.beacon_names, vec![name("aa11"), name("bb22")]);
    }

    #[tokio::test]
    async fn fetch_deployments_follows_metadata_order() {
        let (_, client, user_id) = seeded().await;
        for (deploy, hex) in [("b-deploy", "bb22"), ("a-deploy", "aa11")] {
            client
                .post_deployment(
                    Deployment::new(user_id, deploy)
                        .with_message(Message::new(user_id, format!("msg-{deploy}"), "t", "u"))
                        .with_beacons([name(hex)]),
                )
                .await
                .unwrap();
        }

        let deployments = client.fetch_deployments(&user_id).await.unwrap();
        let names: Vec<_> = deployments.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a-deploy", "b-deploy"]);
        assert_eq!(deployments[0].beacon_names, vec![name("aa11")]);
        assert_eq!(deployments[1].beacon_names, vec![name("bb22")]);
    }
}
