//! Errors raised by log diff and merge.

use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// The overlay's parent chain never meets the base's ancestors.
    #[error("log nodes {base} and {overlay} are unrelated")]
    Structural { base: NodeId, overlay: NodeId },
    #[error("log nodes {left} and {right} share no common ancestor")]
    NoCommonAncestor { left: NodeId, right: NodeId },
    /// Both branches touched the same value with incompatible operations.
    #[error("conflicting edits on value {value}")]
    Conflict { value: String },
}
