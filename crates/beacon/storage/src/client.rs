//! Storage client
//!
//! CRUD and upsert operations over a [`Session`]. Every mutating operation
//! takes an optional caller-owned [`Batch`]: with a batch the statement is only
//! enqueued and [`Upsert::Queued`] is returned; without one it executes
//! immediately and the real outcome is returned.

use crate::session::{Session, DEFAULT_LIMIT};
use crate::statement::{Batch, SetOp, Statement, Upsert};
use crate::{StorageError, StorageResult};
use beacon_dispatch::{DispatchLimit, Dispatcher};
use beacon_types::{
    Beacon, BeaconKey, BeaconName, DeploymentMetadata, Message, Provider, User, UserId,
    UserLookup, UserProfile, ValidationError,
};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Storage client shared by every component. Cloning is cheap.
#[derive(Clone)]
pub struct StorageClient {
    session: Arc<dyn Session>,
    limit: DispatchLimit,
}

impl StorageClient {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            limit: DispatchLimit::unbounded(),
        }
    }

    /// Cap the per-row fan-outs (beacon updates, multi-key lookups).
    pub fn with_dispatch_limit(mut self, limit: DispatchLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub(crate) fn row_dispatcher<T: Send + 'static>(&self) -> Dispatcher<T> {
        Dispatcher::with_limit(self.limit.clone())
    }

    async fn submit(&self, statement: Statement, batch: Option<&mut Batch>) -> StorageResult<Upsert> {
        match batch {
            Some(batch) => {
                debug!(table = %statement.table(), "statement queued");
                batch.push(statement);
                Ok(Upsert::Queued)
            }
            None => {
                self.session.execute(statement).await?;
                Ok(Upsert::Applied)
            }
        }
    }

    /// Submit a batch composed through the `batch` parameters.
    pub async fn execute_batch(&self, batch: Batch) -> StorageResult<()> {
        debug!(statements = batch.len(), "submitting batch");
        self.session.execute_batch(batch).await
    }

    // ========== Users ==========

    /// Upsert the user for an external login. The id is derived from the
    /// provider and provider key, so repeated logins overwrite one row.
    #[instrument(skip(self, profile, provider_key, batch), fields(email = %profile.email))]
    pub async fn create_user(
        &self,
        profile: UserProfile,
        provider: Provider,
        provider_key: &[u8],
        batch: Option<&mut Batch>,
    ) -> StorageResult<User> {
        if provider_key.is_empty() {
            return Err(StorageError::InvalidInput(
                "provider key must not be empty".to_string(),
            ));
        }
        let user = User::from_login(profile, provider, provider_key, Utc::now());
        self.submit(Statement::UpsertUser(user.clone()), batch).await?;
        Ok(user)
    }

    pub async fn fetch_user(&self, lookup: &UserLookup) -> StorageResult<User> {
        self.session
            .get_user(lookup)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {lookup}")))
    }

    // ========== Beacons ==========

    /// Insert beacons (`IF NOT EXISTS`). Without a caller batch the inserts are
    /// grouped into one logged batch and submitted.
    pub async fn create_beacons(
        &self,
        beacons: &[Beacon],
        batch: Option<&mut Batch>,
    ) -> StorageResult<Upsert> {
        ensure_named(beacons)?;
        match batch {
            Some(batch) => {
                for beacon in beacons {
                    batch.push(Statement::InsertBeacon(beacon.clone()));
                }
                Ok(Upsert::Queued)
            }
            None => {
                let mut own = Batch::new();
                for beacon in beacons {
                    own.push(Statement::InsertBeacon(beacon.clone()));
                }
                self.session.execute_batch(own).await?;
                Ok(Upsert::Applied)
            }
        }
    }

    /// Set `deploy_name` on each beacon (`IF EXISTS`), one concurrent write per
    /// beacon. Returns the first failure; writes already dispatched for other
    /// beacons still complete.
    #[instrument(skip(self, beacons), fields(count = beacons.len()))]
    pub async fn update_beacons(&self, beacons: &[Beacon]) -> StorageResult<()> {
        ensure_named(beacons)?;
        let mut dispatch = self.row_dispatcher();
        for beacon in beacons {
            let session = self.session.clone();
            let statement = Statement::UpdateBeaconDeployment {
                key: beacon.key(),
                deploy_name: beacon.deploy_name.clone(),
            };
            dispatch.register(async move { session.execute(statement).await });
        }
        dispatch.first_error().await.map(|_| ())
    }

    /// Like [`update_beacons`](Self::update_beacons) but keeps every outcome;
    /// the i-th result belongs to `beacons[i]`.
    #[instrument(skip(self, beacons), fields(count = beacons.len()))]
    pub async fn assign_beacons(&self, beacons: &[Beacon]) -> Vec<StorageResult<()>> {
        let mut dispatch = self.row_dispatcher();
        for (index, beacon) in beacons.iter().enumerate() {
            let session = self.session.clone();
            let named = ensure_named(std::slice::from_ref(beacon));
            let statement = Statement::UpdateBeaconDeployment {
                key: beacon.key(),
                deploy_name: beacon.deploy_name.clone(),
            };
            dispatch.register(async move {
                let result = match named {
                    Ok(()) => session.execute(statement).await.map(|_| ()),
                    Err(err) => Err(err),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<StorageResult<()>>> =
            std::iter::repeat_with(|| None).take(beacons.len()).collect();
        for (index, result) in dispatch.collect().await {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .zip(beacons)
            .map(|(slot, beacon)| {
                slot.unwrap_or_else(|| {
                    Err(StorageError::Backend(format!(
                        "assignment of beacon {} did not complete",
                        beacon.name
                    )))
                })
            })
            .collect()
    }

    pub async fn fetch_beacon(&self, key: &BeaconKey) -> StorageResult<Beacon> {
        self.session.get_beacon(key).await?.ok_or_else(|| {
            StorageError::NotFound(format!("beacon {}/{}", key.user_id, key.name))
        })
    }

    /// Concurrent multi-key lookup; the i-th result belongs to `names[i]`.
    pub async fn fetch_beacons(
        &self,
        user_id: UserId,
        names: &[BeaconName],
    ) -> Vec<StorageResult<Beacon>> {
        let mut dispatch = self.row_dispatcher();
        for (index, name) in names.iter().enumerate() {
            let client = self.clone();
            let key = BeaconKey::new(user_id, name.clone());
            dispatch.register(async move { (index, client.fetch_beacon(&key).await) });
        }

        let mut slots: Vec<Option<StorageResult<Beacon>>> =
            std::iter::repeat_with(|| None).take(names.len()).collect();
        for (index, result) in dispatch.collect().await {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    Err(StorageError::Backend(format!(
                        "lookup for beacon {name} did not complete"
                    )))
                })
            })
            .collect()
    }

    /// First page (`DEFAULT_LIMIT`) of a user's beacons.
    pub async fn fetch_user_beacons(&self, user_id: &UserId) -> StorageResult<Vec<Beacon>> {
        self.session.list_user_beacons(user_id, DEFAULT_LIMIT).await
    }

    // ========== Messages ==========

    pub async fn create_message(
        &self,
        message: &Message,
        batch: Option<&mut Batch>,
    ) -> StorageResult<Upsert> {
        message.validate()?;
        let statement = Statement::InsertMessage {
            user_id: message.owner()?,
            message: message.clone(),
        };
        self.submit(statement, batch).await
    }

    pub async fn add_message_deployments(
        &self,
        user_id: UserId,
        message_name: &str,
        additions: &[String],
        batch: Option<&mut Batch>,
    ) -> StorageResult<Upsert> {
        self.change_message_deployments(user_id, message_name, additions, SetOp::Add, batch)
            .await
    }

    pub async fn remove_message_deployments(
        &self,
        user_id: UserId,
        message_name: &str,
        removals: &[String],
        batch: Option<&mut Batch>,
    ) -> StorageResult<Upsert> {
        self.change_message_deployments(user_id, message_name, removals, SetOp::Remove, batch)
            .await
    }

    async fn change_message_deployments(
        &self,
        user_id: UserId,
        message_name: &str,
        changes: &[String],
        op: SetOp,
        batch: Option<&mut Batch>,
    ) -> StorageResult<Upsert> {
        if changes.is_empty() {
            return Err(StorageError::InvalidInput(
                "must specify changes to message deployments".to_string(),
            ));
        }
        let statement = Statement::UpdateMessageDeployments {
            user_id,
            name: message_name.to_string(),
            op,
            changes: changes.iter().cloned().collect::<BTreeSet<_>>(),
        };
        self.submit(statement, batch).await
    }

    pub async fn fetch_message(&self, user_id: &UserId, name: &str) -> StorageResult<Message> {
        self.session
            .get_message(user_id, name)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("message {user_id}/{name}")))
    }

    pub async fn fetch_messages(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<Message>> {
        self.session.list_messages(user_id, limit).await
    }

    // ========== Deployment metadata ==========

    pub async fn post_deployment_metadata(
        &self,
        metadata: &DeploymentMetadata,
        batch: Option<&mut Batch>,
    ) -> StorageResult<Upsert> {
        if metadata.deploy_name.is_empty() {
            return Err(ValidationError::EmptyDeploymentName.into());
        }
        self.submit(Statement::UpsertDeploymentMetadata(metadata.clone()), batch)
            .await
    }

    pub async fn fetch_deployment_metadata(
        &self,
        user_id: &UserId,
        deploy_name: &str,
    ) -> StorageResult<DeploymentMetadata> {
        self.session
            .get_deployment_metadata(user_id, deploy_name)
            .await?
            .ok_or_else(|| {
                StorageError::NotFound(format!("deployment metadata {user_id}/{deploy_name}"))
            })
    }

    pub async fn fetch_deployments_metadata(
        &self,
        user_id: &UserId,
    ) -> StorageResult<Vec<DeploymentMetadata>> {
        self.session
            .list_deployments_metadata(user_id, DEFAULT_LIMIT)
            .await
    }

    /// Beacons currently assigned to a deployment, via the beacon index.
    pub async fn fetch_deployment_beacons(
        &self,
        user_id: &UserId,
        deploy_name: &str,
    ) -> StorageResult<Vec<Beacon>> {
        self.session
            .list_deployment_beacons(user_id, deploy_name, DEFAULT_LIMIT)
            .await
    }
}

fn ensure_named(beacons: &[Beacon]) -> StorageResult<()> {
    if beacons.iter().any(|b| b.name.is_empty()) {
        return Err(ValidationError::EmptyBeaconName.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySession;
    use crate::statement::Table;

    fn client() -> (Arc<InMemorySession>, StorageClient) {
        let session = Arc::new(InMemorySession::new());
        (session.clone(), StorageClient::new(session))
    }

    fn name(hex: &str) -> BeaconName {
        BeaconName::from_hex(hex).unwrap()
    }

    #[tokio::test]
    async fn batched_writes_are_deferred_until_submitted() {
        let (session, client) = client();
        let user_id = UserId::generate();
        let mut batch = Batch::new();

        let beacons = vec![
            Beacon::new(user_id, name("aa11")),
            Beacon::new(user_id, name("bb22")),
        ];
        let created = client
            .create_beacons(&beacons, Some(&mut batch))
            .await
            .unwrap();
        let message = Message::new(user_id, "m1", "Hi", "http://x");
        let queued = client
            .create_message(&message, Some(&mut batch))
            .await
            .unwrap();

        assert_eq!(created, Upsert::Queued);
        assert_eq!(queued, Upsert::Queued);
        assert_eq!(batch.len(), 3);
        assert_eq!(session.total_applied_writes(), 0);

        client.execute_batch(batch).await.unwrap();
        assert_eq!(client.fetch_user_beacons(&user_id).await.unwrap().len(), 2);
        assert_eq!(client.fetch_message(&user_id, "m1").await.unwrap().title, "Hi");
    }

    #[tokio::test]
    async fn unbatched_create_beacons_applies_immediately() {
        let (session, client) = client();
        let user_id = UserId::generate();
        let result = client
            .create_beacons(&[Beacon::new(user_id, name("aa11"))], None)
            .await
            .unwrap();
        assert_eq!(result, Upsert::Applied);
        assert_eq!(session.applied_writes(Table::Beacons), 1);
    }

    #[tokio::test]
    async fn update_beacons_does_not_create_unknown_beacons() {
        let (_, client) = client();
        let user_id = UserId::generate();
        client
            .create_beacons(&[Beacon::new(user_id, name("aa11"))], None)
            .await
            .unwrap();

        let result = client
            .update_beacons(&[
                Beacon::assigned(user_id, name("aa11"), "promo1"),
                Beacon::assigned(user_id, name("ffff"), "promo1"),
            ])
            .await;
        assert!(matches!(result, Err(StorageError::ConditionNotMet(_))));

        let missing = client
            .fetch_beacon(&BeaconKey::new(user_id, name("ffff")))
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn assign_beacons_reports_each_beacon() {
        let (_, client) = client();
        let user_id = UserId::generate();
        client
            .create_beacons(&[Beacon::new(user_id, name("aa11"))], None)
            .await
            .unwrap();

        let results = client
            .assign_beacons(&[
                Beacon::assigned(user_id, name("ffff"), "promo1"),
                Beacon::assigned(user_id, name("aa11"), "promo1"),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(StorageError::ConditionNotMet(_))));
        assert!(results[1].is_ok());
        let stored = client
            .fetch_beacon(&BeaconKey::new(user_id, name("aa11")))
            .await
            .unwrap();
        assert_eq!(stored.deploy_name, "promo1");
    }

    #[tokio::test]
    async fn update_beacons_from_another_user_fails() {
        let (_, client) = client();
        let owner = UserId::generate();
        let intruder = UserId::generate();
        client
            .create_beacons(&[Beacon::new(owner, name("aa11"))], None)
            .await
            .unwrap();

        let result = client
            .update_beacons(&[Beacon::assigned(intruder, name("aa11"), "stolen")])
            .await;
        assert!(result.is_err());
        let row = client
            .fetch_beacon(&BeaconKey::new(owner, name("aa11")))
            .await
            .unwrap();
        assert!(!row.is_assigned());
    }

    #[tokio::test]
    async fn fetch_beacons_correlates_by_input_position() {
        let (session, client) = client();
        let user_id = UserId::generate();
        client
            .create_beacons(
                &[
                    Beacon::assigned(user_id, name("aa11"), "one"),
                    Beacon::assigned(user_id, name("cc33"), "three"),
                ],
                None,
            )
            .await
            .unwrap();
        session.delay_table(Table::Beacons, std::time::Duration::from_millis(5));

        let names = vec![name("cc33"), name("bb22"), name("aa11")];
        let results = client.fetch_beacons(user_id, &names).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().deploy_name, "three");
        assert!(matches!(results[1], Err(StorageError::NotFound(_))));
        assert_eq!(results[2].as_ref().unwrap().deploy_name, "one");
    }

    #[tokio::test]
    async fn message_deployment_set_updates() {
        let (_, client) = client();
        let user_id = UserId::generate();
        client
            .create_message(&Message::new(user_id, "m1", "Hi", "http://x"), None)
            .await
            .unwrap();

        client
            .add_message_deployments(user_id, "m1", &["a".into(), "b".into()], None)
            .await
            .unwrap();
        client
            .remove_message_deployments(user_id, "m1", &["a".into()], None)
            .await
            .unwrap();

        let message = client.fetch_message(&user_id, "m1").await.unwrap();
        assert_eq!(message.deployments, BTreeSet::from(["b".to_string()]));

        let empty = client
            .add_message_deployments(user_id, "m1", &[], None)
            .await;
        assert!(matches!(empty, Err(StorageError::InvalidInput(_))));

        let missing = client
            .add_message_deployments(user_id, "nope", &["a".into()], None)
            .await;
        assert!(matches!(missing, Err(StorageError::ConditionNotMet(_))));
    }

    #[tokio::test]
    async fn repeated_login_upserts_one_user() {
        let (_, client) = client();
        let profile = UserProfile {
            email: "int-test.email@gmail.com".into(),
            given_name: "Int".into(),
            ..Default::default()
        };

        let first = client
            .create_user(profile.clone(), Provider::Google, b"subject-1", None)
            .await
            .unwrap();
        let second = client
            .create_user(profile, Provider::Google, b"subject-1", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let by_email = client
            .fetch_user(&UserLookup::Email("int-test.email@gmail.com".into()))
            .await
            .unwrap();
        assert_eq!(by_email.id, first.id);

        let unknown = client.fetch_user(&UserLookup::Id(UserId::generate())).await;
        assert!(matches!(unknown, Err(StorageError::NotFound(_))));
    }
}
