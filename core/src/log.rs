//! Arena-backed persistent operation log.
//!
//! A node is either a root (a flat initial content list) or an operation wrapping
//! a parent node. Nodes are never mutated once created: `add`/`del` append a new
//! node and return its handle. A node's view is the replay of its root's content
//! followed by every operation from the root down to the node.

use std::collections::{BTreeSet, HashSet};
use std::{fmt, iter};

use opal_types::Operation;

use crate::LogError;

/// Handle to a node inside one [`PersistentLog`].
///
/// Handles are only meaningful for the log that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How `merge` treats suffixes that touch the same value incompatibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Replay the overlay suffix on top of the base; the last replayed operation wins.
    #[default]
    LastWriterWins,
    /// Fail with [`LogError::Conflict`] when one suffix adds a value the other deletes.
    RejectConflicts,
}

#[derive(Debug, Clone)]
enum Node<T> {
    Root(Vec<T>),
    Op { parent: NodeId, op: Operation<T> },
}

#[derive(Debug, Clone)]
pub struct PersistentLog<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Default for PersistentLog<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T> PersistentLog<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes ever created in this log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<T: Ord + Clone> PersistentLog<T> {

    /// Create a new root holding `values`.
    pub fn set(&mut self, values: impl IntoIterator<Item = T>) -> NodeId {
        self.push(Node::Root(values.into_iter().collect()))
    }

    /// Create a new empty root.
    pub fn empty(&mut self) -> NodeId {
        self.push(Node::Root(Vec::new()))
    }

    pub fn add(&mut self, node: NodeId, value: T) -> NodeId {
        self.apply(node, Operation::Add(value))
    }

    pub fn del(&mut self, node: NodeId, value: T) -> NodeId {
        self.apply(node, Operation::Delete(value))
    }

    pub fn apply(&mut self, node: NodeId, op: Operation<T>) -> NodeId {
        self.push(Node::Op { parent: node, op })
    }

    /// Append every operation in order, returning the new tip.
    pub fn apply_all(&mut self, node: NodeId, ops: impl IntoIterator<Item = Operation<T>>) -> NodeId {
        ops.into_iter().fold(node, |tip, op| self.apply(tip, op))
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        match &self.nodes[node.index()] {
            Node::Root(_) => None,
            Node::Op { parent, .. } => Some(*parent),
        }
    }

    /// Walk from `node` (inclusive) up to its root.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = Some(node);
        iter::from_fn(move || {
            let current = next?;
            next = self.parent(current);
            Some(current)
        })
    }

    /// Materialize the set a node represents.
    #[must_use]
    pub fn view(&self, node: NodeId) -> BTreeSet<T> {
        let mut chain: Vec<NodeId> = self.ancestors(node).collect();
        chain.reverse();

        let mut set = BTreeSet::new();
        for id in chain {
            match &self.nodes[id.index()] {
                Node::Root(values) => set.extend(values.iter().cloned()),
                Node::Op { op: Operation::Add(v), .. } => {
                    set.insert(v.clone());
                }
                Node::Op { op: Operation::Delete(v), .. } => {
                    set.remove(v);
                }
            }
        }
        set
    }

    /// Operations on `overlay`'s chain that are not ancestors of `base`, root-to-tip.
    pub fn ancestor_suffix(&self, base: NodeId, overlay: NodeId) -> Result<Vec<Operation<T>>, LogError> {
        let base_ancestors: HashSet<NodeId> = self.ancestors(base).collect();

        let mut ops = Vec::new();
        let mut current = overlay;
        loop {
            if base_ancestors.contains(&current) {
                ops.reverse();
                return Ok(ops);
            }
            match &self.nodes[current.index()] {
                Node::Root(_) => return Err(LogError::Structural { base, overlay }),
                Node::Op { parent, op } => {
                    ops.push(op.clone());
                    current = *parent;
                }
            }
        }
    }

    /// The operations `overlay` carries beyond what `base` already contains.
    pub fn diff(&self, base: NodeId, overlay: NodeId) -> Result<Vec<Operation<T>>, LogError> {
        self.ancestor_suffix(base, overlay)
    }

    /// Nearest node that both `left` and `right` descend from.
    #[must_use]
    pub fn common_ancestor(&self, left: NodeId, right: NodeId) -> Option<NodeId> {
        let left_ancestors: HashSet<NodeId> = self.ancestors(left).collect();
        self.ancestors(right).find(|id| left_ancestors.contains(id))
    }

    /// Replay `overlay`'s suffix on top of `base` with [`MergePolicy::LastWriterWins`].
    pub fn merge(&mut self, base: NodeId, overlay: NodeId) -> Result<NodeId, LogError>
    where
        T: fmt::Debug,
    {
        self.merge_with(base, overlay, MergePolicy::LastWriterWins)
    }

    pub fn merge_with(
        &mut self,
        base: NodeId,
        overlay: NodeId,
        policy: MergePolicy,
    ) -> Result<NodeId, LogError>
    where
        T: fmt::Debug,
    {
        let incoming = self.ancestor_suffix(base, overlay)?;
        if incoming.is_empty() {
            return Ok(base);
        }
        if policy == MergePolicy::RejectConflicts {
            let local = self.ancestor_suffix(overlay, base)?;
            if let Some(value) = first_conflict(&local, &incoming) {
                tracing::debug!(%base, %overlay, ?value, "merge rejected");
                return Err(LogError::Conflict {
                    value: format!("{value:?}"),
                });
            }
        }
        Ok(self.apply_all(base, incoming))
    }

    fn push(&mut self, node: Node<T>) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(node);
        id
    }
}

fn first_conflict<'a, T: Ord>(local: &'a [Operation<T>], incoming: &[Operation<T>]) -> Option<&'a T> {
    let (incoming_adds, incoming_dels): (BTreeSet<&T>, BTreeSet<&T>) = incoming.iter().fold(
        (BTreeSet::new(), BTreeSet::new()),
        |(mut adds, mut dels), op| {
            match op {
                Operation::Add(v) => adds.insert(v),
                Operation::Delete(v) => dels.insert(v),
            };
            (adds, dels)
        },
    );
    local.iter().find_map(|op| match op {
        Operation::Add(v) if incoming_dels.contains(v) => Some(v),
        Operation::Delete(v) if incoming_adds.contains(v) => Some(v),
        _ => None,
    })
}
