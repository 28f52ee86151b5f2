//! Core versioning logic for Opal.
//!
//! This crate holds the [`PersistentLog`]: an immutable, version-chained log of
//! `Add`/`Delete` operations over a set. Versions are nodes in an arena addressed
//! by [`NodeId`] handles, so many branches share structure without aliasing.

mod error;
mod log;

pub use error::LogError;
pub use log::{MergePolicy, NodeId, PersistentLog};
pub use opal_types::{Edit, Operation};
