//! Core data types for Opal.
//!
//! This crate contains pure data types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the workspace.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ids;
pub mod wire;

pub use ids::{CollectionId, WorldId};

use serde::{Deserialize, Serialize};
use std::{slice, vec};

// ============================================================================
// Operations
// ============================================================================

/// A single mutation recorded in a versioned log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation<T> {
    Add(T),
    Delete(T),
}

impl<T> Operation<T> {
    #[must_use]
    pub const fn is_add(&self) -> bool {
        matches!(self, Operation::Add(_))
    }

    /// Apply a value transform while keeping the operation kind.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Operation<U> {
        match self {
            Operation::Add(v) => Operation::Add(f(v)),
            Operation::Delete(v) => Operation::Delete(f(v)),
        }
    }

    /// Like [`Operation::map`] for a transform that can fail.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Operation<U>, E> {
        Ok(match self {
            Operation::Add(v) => Operation::Add(f(v)?),
            Operation::Delete(v) => Operation::Delete(f(v)?),
        })
    }
}

// ============================================================================
// Edits
// ============================================================================

/// Callbacks for walking an [`Edit`] in order.
pub trait EditVisitor<T> {
    fn add(&mut self, value: &T);
    fn delete(&mut self, value: &T);
}

/// The ordered operations distinguishing two related log versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit<T> {
    ops: Vec<Operation<T>>,
}

impl<T> Edit<T> {
    #[must_use]
    pub fn new(ops: Vec<Operation<T>>) -> Self {
        Self { ops }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Operation<T>> {
        self.ops.iter()
    }

    #[must_use]
    pub fn into_operations(self) -> Vec<Operation<T>> {
        self.ops
    }

    /// Walk the operations root-to-tip, dispatching to the visitor.
    pub fn visit<V: EditVisitor<T> + ?Sized>(&self, visitor: &mut V) {
        for op in &self.ops {
            match op {
                Operation::Add(v) => visitor.add(v),
                Operation::Delete(v) => visitor.delete(v),
            }
        }
    }

    /// Fold the edit into a numeric score by summing a per-operation cost.
    pub fn score(&self, mut cost: impl FnMut(&Operation<T>) -> f64) -> f64 {
        self.ops.iter().map(&mut cost).sum()
    }
}

impl<T> Default for Edit<T> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<T> IntoIterator for Edit<T> {
    type Item = Operation<T>;
    type IntoIter = vec::IntoIter<Operation<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Edit<T> {
    type Item = &'a Operation<T>;
    type IntoIter = slice::Iter<'a, Operation<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

impl<T> From<Vec<Operation<T>>> for Edit<T> {
    fn from(ops: Vec<Operation<T>>) -> Self {
        Self { ops }
    }
}
