//! Beacon deployment entity model.
//!
//! A *deployment* associates one message (title + URL) with a set of physical
//! beacons. It is never stored as a single row: it is decomposed into
//!
//! - beacon rows carrying the deployment name (`Beacon::deploy_name`)
//! - a message row whose `deployments` set is a reverse index of deployment names
//! - a metadata row binding `(user_id, deploy_name)` to a message name
//!
//! and reassembled on read. This crate holds the records for those rows and
//! their boundary encoding: beacon identifiers are raw bytes internally and
//! lowercase hex strings in JSON.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod attachment;
pub mod beacon;
pub mod deployment;
pub mod error;
pub mod ids;
pub mod message;
pub mod user;

pub use attachment::AttachmentData;
pub use beacon::{Beacon, BeaconKey};
pub use deployment::{Deployment, DeploymentMetadata, MessageSource};
pub use error::ValidationError;
pub use ids::{BeaconName, Provider, UserId};
pub use message::{Message, DEFAULT_LANG};
pub use user::{User, UserLookup, UserProfile};
