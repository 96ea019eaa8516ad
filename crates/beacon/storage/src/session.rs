use crate::statement::{Batch, Statement};
use crate::StorageResult;
use async_trait::async_trait;
use beacon_types::{Beacon, BeaconKey, DeploymentMetadata, Message, User, UserId, UserLookup};

/// Default bound on listing reads. Callers needing more must paginate.
pub const DEFAULT_LIMIT: usize = 250;

/// Connection to the wide-column store.
///
/// One session is built per process and shared by reference; implementations
/// are internally synchronized.
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute one statement.
    async fn execute(&self, statement: Statement) -> StorageResult<()>;

    /// Submit a batch. A failed condition rejects the whole batch.
    async fn execute_batch(&self, batch: Batch) -> StorageResult<()>;

    async fn get_user(&self, lookup: &UserLookup) -> StorageResult<Option<User>>;

    async fn get_beacon(&self, key: &BeaconKey) -> StorageResult<Option<Beacon>>;

    async fn list_user_beacons(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<Beacon>>;

    async fn get_message(&self, user_id: &UserId, name: &str) -> StorageResult<Option<Message>>;

    async fn list_messages(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<Message>>;

    async fn get_deployment_metadata(
        &self,
        user_id: &UserId,
        deploy_name: &str,
    ) -> StorageResult<Option<DeploymentMetadata>>;

    async fn list_deployments_metadata(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> StorageResult<Vec<DeploymentMetadata>>;

    /// Read the `(user_id, deploy_name)` beacon index.
    async fn list_deployment_beacons(
        &self,
        user_id: &UserId,
        deploy_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<Beacon>>;
}
