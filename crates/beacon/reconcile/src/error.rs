use beacon_registry::RegistryError;
use beacon_storage::StorageError;
use beacon_types::{BeaconName, ValidationError};
use thiserror::Error;

/// Result type for reconciler operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// One deployment group of a bulk change failed; other groups proceed.
    #[error("deployment {deploy_name}: {source}")]
    Group {
        deploy_name: String,
        #[source]
        source: Box<ReconcileError>,
    },

    /// Registry reconciliation failed for one beacon.
    #[error("beacon {name}: {source}")]
    Beacon {
        name: BeaconName,
        #[source]
        source: RegistryError,
    },

    /// The storage write for one beacon failed; its registry step was skipped.
    #[error("beacon {name}: {source}")]
    BeaconStorage {
        name: BeaconName,
        #[source]
        source: StorageError,
    },

    #[error("deployment {0} has no message bound")]
    UnboundDeployment(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ReconcileError {
    pub(crate) fn in_group(self, deploy_name: &str) -> Self {
        ReconcileError::Group {
            deploy_name: deploy_name.to_string(),
            source: Box::new(self),
        }
    }
}
