//! Beacon registry integration.
//!
//! The external registry owns the physical beacons and the attachments shown
//! to people near them. This crate provides:
//! - [`RegistryApi`], the registry surface the rest of the system consumes
//! - [`HttpRegistryClient`] for the REST API and [`InMemoryRegistry`] for tests
//! - [`RegistrySynchronizer`], which drives beacons to a desired attachment
//!   state with delete-then-create reconciliation

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod api;
mod config;
mod error;
pub mod http;
pub mod memory;
pub mod model;
mod sync;

pub use api::{beacon_resource, RegistryApi, BEACON_PATH_PREFIX, DEFAULT_NAMESPACED_TYPE};
pub use config::{
    RegistryConfig, DEFAULT_ENDPOINT, DEFAULT_SHORT_LINK_BASE, DEFAULT_SHORT_SUFFIX_LEN,
};
pub use error::{RegistryError, RegistryResult};
pub use http::HttpRegistryClient;
pub use memory::{InMemoryRegistry, RegistryCall, RegistryOp};
pub use model::{BeaconAttachment, ListBeaconsResponse, RegistryBeacon};
pub use sync::{AttachmentResult, RegistrySynchronizer};
