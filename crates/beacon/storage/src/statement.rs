//! Typed write statements and batches
//!
//! Every mutation the storage client issues is one [`Statement`]. A statement
//! either executes immediately against a session or is enqueued into a
//! caller-owned [`Batch`] that the caller submits later.
//!
//! A batch only groups statements into one round trip. It is atomic when all
//! of its statements share a partition; a batch spanning beacon, message and
//! metadata rows is **not** a cross-partition transaction.

use beacon_types::{Beacon, BeaconKey, DeploymentMetadata, Message, User, UserId};
use std::collections::BTreeSet;
use std::fmt;

/// Tables (and the one materialized view) of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Users,
    Beacons,
    /// Beacon rows re-keyed by `(user_id, deploy_name)`; maintained by the
    /// store from beacon writes, never written directly.
    BeaconDeployments,
    Messages,
    DeploymentsMetadata,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Beacons => "beacons",
            Table::BeaconDeployments => "beacon_deployments",
            Table::Messages => "messages",
            Table::DeploymentsMetadata => "deployments_metadata",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set-column update direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Plain insert; re-running it overwrites the row.
    UpsertUser(User),

    /// `IF NOT EXISTS`
    InsertBeacon(Beacon),

    /// `IF EXISTS`: callers cannot fabricate beacon ownership through updates.
    UpdateBeaconDeployment { key: BeaconKey, deploy_name: String },

    /// `IF NOT EXISTS`
    InsertMessage { user_id: UserId, message: Message },

    /// `IF EXISTS`
    UpdateMessageDeployments {
        user_id: UserId,
        name: String,
        op: SetOp,
        changes: BTreeSet<String>,
    },

    UpsertDeploymentMetadata(DeploymentMetadata),
}

impl Statement {
    pub fn table(&self) -> Table {
        match self {
            Statement::UpsertUser(_) => Table::Users,
            Statement::InsertBeacon(_) | Statement::UpdateBeaconDeployment { .. } => Table::Beacons,
            Statement::InsertMessage { .. } | Statement::UpdateMessageDeployments { .. } => {
                Table::Messages
            }
            Statement::UpsertDeploymentMetadata(_) => Table::DeploymentsMetadata,
        }
    }

    pub fn is_conditional(&self) -> bool {
        !matches!(
            self,
            Statement::UpsertUser(_) | Statement::UpsertDeploymentMetadata(_)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchKind {
    #[default]
    Logged,
    Unlogged,
}

/// Externally-owned group of deferred statements.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    kind: BatchKind,
    statements: Vec<Statement>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unlogged() -> Self {
        Self {
            kind: BatchKind::Unlogged,
            statements: Vec::new(),
        }
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

/// Outcome of a mutating storage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// Executed; the write is durable.
    Applied,
    /// Enqueued into the caller's batch; nothing has executed yet and any
    /// error surfaces when the batch is submitted.
    Queued,
}
