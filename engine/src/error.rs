//! Engine error taxonomy.

use opal_core::LogError;
use opal_types::{CollectionId, WorldId};
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// `Clone` so that one child failure can be delivered to every waiter on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Log(#[from] LogError),
    /// The acquire/release/suspend contract was violated.
    #[error("scheduler contract violated: {0}")]
    Scheduling(String),
    /// A world body returned an error or panicked.
    #[error("world {world} failed: {message}")]
    Body { world: WorldId, message: String },
    #[error("{operation} requires world {world} to have a parent")]
    NoParent {
        world: WorldId,
        operation: &'static str,
    },
    /// `update` was called for a world that never looked at the collection.
    #[error("collection {collection} has no entry for world {world}")]
    MissingEntry {
        collection: CollectionId,
        world: WorldId,
    },
    /// Merging a child twice would replay its edits twice.
    #[error("world {world} was already committed")]
    AlreadyCommitted { world: WorldId },
    #[error("world {child} is not a child of world {parent}")]
    NotChild { child: WorldId, parent: WorldId },
    /// The world finished without ever publishing to the weight being read.
    #[error("world {world} finished without setting the weight")]
    WeightUnset { world: WorldId },
    #[error("no candidate world produced a weight")]
    EmptySearch,
    /// An external sink rejected or failed to apply edits at the top world.
    #[error("external sink failed: {message}")]
    Sink { message: String },
}

impl EngineError {
    pub fn scheduling(message: impl Into<String>) -> Self {
        Self::Scheduling(message.into())
    }

    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }

    /// Failures that stay local to one branch: its body failed or never published.
    #[must_use]
    pub const fn is_branch_failure(&self) -> bool {
        matches!(self, Self::Body { .. } | Self::WeightUnset { .. })
    }
}
