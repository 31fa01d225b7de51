//! Keeps a full-text search index in sync with a document-management database.
//!
//! Folders and the pages of each document's latest version are projected
//! into [`index::IndexEntity`] records. [`sync::Synchronizer`] applies
//! add/remove/swap operations; [`tasks::TaskRunner`] runs them on behalf of a
//! queue with a bounded retry policy.

pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod models;
pub mod projection;
pub mod sync;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use config::{Config, RetryPolicy};
pub use error::{Error, Result};
pub use sync::{ReindexMode, SyncReport, Synchronizer};
pub use tasks::{Task, TaskRunner};
