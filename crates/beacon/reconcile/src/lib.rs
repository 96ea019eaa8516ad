//! Beacon deployment reconciliation.
//!
//! Ties the storage side of a deployment (message, beacon assignments,
//! metadata) to the registry side (attachments served to nearby devices):
//! - [`Reconciler::deploy`] writes a deployment and attaches its message
//! - [`Reconciler::change_deployments`] moves beacons between deployments
//!
//! Configuration and tracing bootstrap for hosting processes live in
//! [`config`] and [`telemetry`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod config;
mod error;
mod reconciler;
pub mod telemetry;

pub use config::{LoggingConfig, ReconcileConfig, StorageConfig};
pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{ChangeReport, DeployReport, Reconciler};
