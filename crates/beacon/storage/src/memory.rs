//! In-memory reference implementation of the wide-column session.
//!
//! Rows are grouped by partition (`user_id`) and ordered by clustering key, and
//! the `(user_id, deploy_name)` beacon index is maintained on every beacon
//! write the way the store's materialized view is. Fault and latency
//! injection let tests exercise partial-failure and completion-order paths.

use crate::session::Session;
use crate::statement::{Batch, SetOp, Statement, Table};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use beacon_types::{
    Beacon, BeaconKey, BeaconName, DeploymentMetadata, Message, User, UserId, UserLookup,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    users_by_email: HashMap<String, UserId>,
    beacons: HashMap<UserId, BTreeMap<BeaconName, Beacon>>,
    beacon_deployments: HashMap<(UserId, String), BTreeSet<BeaconName>>,
    messages: HashMap<UserId, BTreeMap<String, Message>>,
    deployments_metadata: HashMap<UserId, BTreeMap<String, DeploymentMetadata>>,
}

/// In-memory wide-column session.
#[derive(Default)]
pub struct InMemorySession {
    tables: RwLock<Tables>,
    faults: RwLock<HashMap<Table, String>>,
    latency: RwLock<HashMap<Table, Duration>>,
    applied: RwLock<HashMap<Table, usize>>,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read and write touching `table` fail with `reason`.
    pub fn fail_table(&self, table: Table, reason: impl Into<String>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.insert(table, reason.into());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.write() {
            faults.clear();
        }
    }

    pub fn clear_latency(&self) {
        if let Ok(mut latency) = self.latency.write() {
            latency.clear();
        }
    }

    /// Delay every operation touching `table`.
    pub fn delay_table(&self, table: Table, delay: Duration) {
        if let Ok(mut latency) = self.latency.write() {
            latency.insert(table, delay);
        }
    }

    /// Number of statements applied to `table` so far.
    pub fn applied_writes(&self, table: Table) -> usize {
        self.applied
            .read()
            .map(|applied| applied.get(&table).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_applied_writes(&self) -> usize {
        self.applied
            .read()
            .map(|applied| applied.values().sum())
            .unwrap_or(0)
    }

    /// Fault check and injected latency for one touched table.
    async fn enter(&self, table: Table) -> StorageResult<()> {
        self.enter_all(&[table]).await
    }

    async fn enter_all(&self, tables: &[Table]) -> StorageResult<()> {
        let delay = {
            let latency = self
                .latency
                .read()
                .map_err(|_| StorageError::Backend("latency lock poisoned".to_string()))?;
            tables
                .iter()
                .filter_map(|table| latency.get(table).copied())
                .max()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let faults = self
            .faults
            .read()
            .map_err(|_| StorageError::Backend("fault lock poisoned".to_string()))?;
        for table in tables {
            if let Some(reason) = faults.get(table) {
                return Err(StorageError::Backend(format!("{table}: {reason}")));
            }
        }
        Ok(())
    }

    fn record_applied(&self, statements: &[Statement]) -> StorageResult<()> {
        let mut applied = self
            .applied
            .write()
            .map_err(|_| StorageError::Backend("write counter lock poisoned".to_string()))?;
        for statement in statements {
            *applied.entry(statement.table()).or_default() += 1;
        }
        Ok(())
    }

    fn read_tables(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StorageError::Backend("tables lock poisoned".to_string()))
    }

    fn write_tables(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StorageError::Backend("tables lock poisoned".to_string()))
    }
}

impl Tables {
    fn beacon(&self, key: &BeaconKey) -> Option<&Beacon> {
        self.beacons
            .get(&key.user_id)
            .and_then(|partition| partition.get(&key.name))
    }

    fn message(&self, user_id: &UserId, name: &str) -> Option<&Message> {
        self.messages
            .get(user_id)
            .and_then(|partition| partition.get(name))
    }

    /// Evaluate a statement's condition against the current rows.
    fn check(&self, statement: &Statement) -> StorageResult<()> {
        match statement {
            Statement::InsertBeacon(beacon) => {
                if self.beacon(&beacon.key()).is_some() {
                    return Err(StorageError::ConditionNotMet(format!(
                        "beacon {}/{} already exists",
                        beacon.user_id, beacon.name
                    )));
                }
            }
            Statement::UpdateBeaconDeployment { key, .. } => {
                if self.beacon(key).is_none() {
                    return Err(StorageError::ConditionNotMet(format!(
                        "beacon {}/{} does not exist",
                        key.user_id, key.name
                    )));
                }
            }
            Statement::InsertMessage { user_id, message } => {
                if self.message(user_id, &message.name).is_some() {
                    return Err(StorageError::ConditionNotMet(format!(
                        "message {}/{} already exists",
                        user_id, message.name
                    )));
                }
            }
            Statement::UpdateMessageDeployments { user_id, name, .. } => {
                if self.message(user_id, name).is_none() {
                    return Err(StorageError::ConditionNotMet(format!(
                        "message {user_id}/{name} does not exist"
                    )));
                }
            }
            Statement::UpsertUser(_) | Statement::UpsertDeploymentMetadata(_) => {}
        }
        Ok(())
    }

    /// Apply a statement whose condition has already been checked.
    fn apply(&mut self, statement: Statement) {
        match statement {
            Statement::UpsertUser(user) => {
                if let Some(previous) = self.users.get(&user.id) {
                    if previous.email != user.email {
                        self.users_by_email.remove(&previous.email);
                    }
                }
                self.users_by_email.insert(user.email.clone(), user.id);
                self.users.insert(user.id, user);
            }
            Statement::InsertBeacon(beacon) => {
                self.index_beacon(&beacon.user_id, &beacon.name, None, &beacon.deploy_name);
                self.beacons
                    .entry(beacon.user_id)
                    .or_default()
                    .insert(beacon.name.clone(), beacon);
            }
            Statement::UpdateBeaconDeployment { key, deploy_name } => {
                let previous = self
                    .beacons
                    .get_mut(&key.user_id)
                    .and_then(|partition| partition.get_mut(&key.name))
                    .map(|row| std::mem::replace(&mut row.deploy_name, deploy_name.clone()));
                if let Some(previous) = previous {
                    self.index_beacon(&key.user_id, &key.name, Some(&previous), &deploy_name);
                }
            }
            Statement::InsertMessage { user_id, mut message } => {
                message.user_id = Some(user_id);
                self.messages
                    .entry(user_id)
                    .or_default()
                    .insert(message.name.clone(), message);
            }
            Statement::UpdateMessageDeployments {
                user_id,
                name,
                op,
                changes,
            } => {
                if let Some(message) = self
                    .messages
                    .get_mut(&user_id)
                    .and_then(|partition| partition.get_mut(&name))
                {
                    match op {
                        SetOp::Add => message.deployments.extend(changes),
                        SetOp::Remove => message.deployments.retain(|d| !changes.contains(d)),
                    }
                }
            }
            Statement::UpsertDeploymentMetadata(metadata) => {
                self.deployments_metadata
                    .entry(metadata.user_id)
                    .or_default()
                    .insert(metadata.deploy_name.clone(), metadata);
            }
        }
    }

    /// Keep the beacon index in step with a beacon row's deploy name.
    fn index_beacon(
        &mut self,
        user_id: &UserId,
        name: &BeaconName,
        previous: Option<&str>,
        current: &str,
    ) {
        if let Some(previous) = previous.filter(|p| !p.is_empty()) {
            let key = (*user_id, previous.to_string());
            if let Some(members) = self.beacon_deployments.get_mut(&key) {
                members.remove(name);
                if members.is_empty() {
                    self.beacon_deployments.remove(&key);
                }
            }
        }
        if !current.is_empty() {
            self.beacon_deployments
                .entry((*user_id, current.to_string()))
                .or_default()
                .insert(name.clone());
        }
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn execute(&self, statement: Statement) -> StorageResult<()> {
        self.enter(statement.table()).await?;
        {
            let mut tables = self.write_tables()?;
            tables.check(&statement)?;
            tables.apply(statement.clone());
        }
        self.record_applied(std::slice::from_ref(&statement))
    }

    async fn execute_batch(&self, batch: Batch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let touched = batch
            .statements()
            .iter()
            .map(Statement::table)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        self.enter_all(&touched).await?;

        let statements = batch.into_statements();
        {
            let mut tables = self.write_tables()?;
            // Conditions see the pre-batch state.
            for statement in &statements {
                tables.check(statement)?;
            }
            for statement in statements.iter().cloned() {
                tables.apply(statement);
            }
        }
        self.record_applied(&statements)
    }

    async fn get_user(&self, lookup: &UserLookup) -> StorageResult<Option<User>> {
        self.enter(Table::Users).await?;
        let tables = self.read_tables()?;
        let id = match lookup {
            UserLookup::Id(id) => Some(*id),
            UserLookup::Email(email) => tables.users_by_email.get(email).copied(),
        };
        Ok(id.and_then(|id| tables.users.get(&id).cloned()))
    }

    async fn get_beacon(&self, key: &BeaconKey) -> StorageResult<Option<Beacon>> {
        self.enter(Table::Beacons).await?;
        Ok(self.read_tables()?.beacon(key).cloned())
    }

    async fn list_user_beacons(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<Beacon>> {
        self.enter(Table::Beacons).await?;
        let tables = self.read_tables()?;
        Ok(tables
            .beacons
            .get(user_id)
            .map(|partition| partition.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_message(&self, user_id: &UserId, name: &str) -> StorageResult<Option<Message>> {
        self.enter(Table::Messages).await?;
        Ok(self.read_tables()?.message(user_id, name).cloned())
    }

    async fn list_messages(&self, user_id: &UserId, limit: usize) -> StorageResult<Vec<Message>> {
        self.enter(Table::Messages).await?;
        let tables = self.read_tables()?;
        Ok(tables
            .messages
            .get(user_id)
            .map(|partition| partition.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_deployment_metadata(
        &self,
        user_id: &UserId,
        deploy_name: &str,
    ) -> StorageResult<Option<DeploymentMetadata>> {
        self.enter(Table::DeploymentsMetadata).await?;
        let tables = self.read_tables()?;
        Ok(tables
            .deployments_metadata
            .get(user_id)
            .and_then(|partition| partition.get(deploy_name))
            .cloned())
    }

    async fn list_deployments_metadata(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> StorageResult<Vec<DeploymentMetadata>> {
        self.enter(Table::DeploymentsMetadata).await?;
        let tables = self.read_tables()?;
        Ok(tables
            .deployments_metadata
            .get(user_id)
            .map(|partition| partition.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_deployment_beacons(
        &self,
        user_id: &UserId,
        deploy_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<Beacon>> {
        self.enter(Table::BeaconDeployments).await?;
        let tables = self.read_tables()?;
        let Some(members) = tables
            .beacon_deployments
            .get(&(*user_id, deploy_name.to_string()))
        else {
            return Ok(Vec::new());
        };
        Ok(members
            .iter()
            .take(limit)
            .filter_map(|name| tables.beacon(&BeaconKey::new(*user_id, name.clone())).cloned())
            .collect())
    }
}
