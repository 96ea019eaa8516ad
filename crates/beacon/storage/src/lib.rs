//! Beacon deployment storage.
//!
//! The store is partition-oriented: every table is keyed by `user_id` first,
//! and beacon rows are additionally indexed by `(user_id, deploy_name)`. This
//! crate provides:
//! - the [`Session`] contract over that store, with typed [`Statement`]s and
//!   externally-owned [`Batch`]es
//! - an in-memory engine for tests and local runs, and a PostgreSQL engine
//!   behind the `postgres` feature
//! - the [`StorageClient`], including deployment write/read orchestration
//!
//! Design stance:
//! - No multi-row write is transactional. A deployment touches three
//!   partitions and partial success is a normal outcome.
//! - Conditional writes (`IF EXISTS` / `IF NOT EXISTS`) guard beacon ownership
//!   and message identity.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod client;
mod deployment;
mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod session;
mod statement;

pub use client::StorageClient;
pub use error::{StorageError, StorageResult};
pub use memory::InMemorySession;
pub use session::{Session, DEFAULT_LIMIT};
pub use statement::{Batch, BatchKind, SetOp, Statement, Table, Upsert};
