//! Per-world materialized views over a shared [`PersistentLog`].
//!
//! Each [`Collection`] owns one log arena and a map from world to the node that
//! world currently sees. A world with no entry inherits its nearest ancestor's
//! node on first access (copy-on-write), so sibling branches never observe each
//! other's edits until they are merged upward by a commit.
//!
//! A collection built with an [`ExternalSink`] additionally reconciles its edits
//! with an outside system whenever the entry of the top world changes.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use opal_core::{MergePolicy, NodeId, PersistentLog};
use opal_types::{CollectionId, Operation, WorldId};

use crate::scheduler::LocalFut;
use crate::{EngineError, World};

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Values that can live in a collection.
pub trait Element: Ord + Clone + fmt::Debug + 'static {}

impl<T: Ord + Clone + fmt::Debug + 'static> Element for T {}

/// Future returned by [`ExternalSink::send`].
pub type SinkFut<'a, T> = LocalFut<'a, Result<Vec<Operation<T>>, EngineError>>;

/// The side-effecting half of an external collection.
///
/// `send` receives the top world's current contents and the operations about to
/// be committed on top of them. It performs the real side effects and returns the
/// operations actually applied, which may carry rewritten values (for example
/// server-issued identifiers). Those operations become the reconciled top entry.
pub trait ExternalSink<T>: 'static {
    fn send<'a>(&'a self, current: &'a BTreeSet<T>, ops: &'a [Operation<T>]) -> SinkFut<'a, T>;
}

/// Type-erased view of a collection used by `commit`.
pub(crate) trait Touched {
    fn collection_id(&self) -> CollectionId;
    fn merge_into_parent<'a>(&'a self, world: &'a World) -> LocalFut<'a, Result<(), EngineError>>;
}

pub struct Collection<T> {
    inner: Rc<CollectionInner<T>>,
}

struct CollectionInner<T> {
    id: CollectionId,
    owner: WorldId,
    policy: MergePolicy,
    sink: Option<Rc<dyn ExternalSink<T>>>,
    core: RefCell<Views<T>>,
}

struct Views<T> {
    log: PersistentLog<T>,
    entries: HashMap<WorldId, NodeId>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.borrow();
        f.debug_struct("Collection")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("external", &self.inner.sink.is_some())
            .field("entries", &core.entries.len())
            .field("nodes", &core.log.len())
            .finish()
    }
}

impl<T: Element> Collection<T> {
    pub(crate) fn new(
        owner: &World,
        initial: Vec<T>,
        policy: MergePolicy,
        sink: Option<Rc<dyn ExternalSink<T>>>,
    ) -> Self {
        let mut log = PersistentLog::new();
        let root = log.set(initial);
        let mut entries = HashMap::new();
        entries.insert(owner.id(), root);
        let id = CollectionId::new(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(collection = %id, owner = %owner.id(), external = sink.is_some(), "collection created");
        Self {
            inner: Rc::new(CollectionInner {
                id,
                owner: owner.id(),
                policy,
                sink,
                core: RefCell::new(Views { log, entries }),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.inner.id
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        self.inner.sink.is_some()
    }

    #[must_use]
    pub fn has_entry(&self, world: &World) -> bool {
        self.inner.core.borrow().entries.contains_key(&world.id())
    }

    /// The node `world` sees, inheriting (and caching) the nearest ancestor's entry.
    pub fn lookup(&self, world: &World) -> Result<NodeId, EngineError> {
        let mut core = self.inner.core.borrow_mut();
        let mut missing = Vec::new();
        let mut current = world;
        let node = loop {
            if let Some(node) = core.entries.get(&current.id()) {
                break *node;
            }
            missing.push(current.id());
            current = current.parent().ok_or(EngineError::NoParent {
                world: current.id(),
                operation: "collection lookup",
            })?;
        };
        for id in missing {
            core.entries.insert(id, node);
        }
        Ok(node)
    }

    pub fn view(&self, world: &World) -> Result<BTreeSet<T>, EngineError> {
        let node = self.lookup(world)?;
        Ok(self.materialize(node))
    }

    #[must_use]
    pub fn materialize(&self, node: NodeId) -> BTreeSet<T> {
        self.inner.core.borrow().log.view(node)
    }

    pub fn diff_nodes(&self, base: NodeId, overlay: NodeId) -> Result<Vec<Operation<T>>, EngineError> {
        Ok(self.inner.core.borrow().log.diff(base, overlay)?)
    }

    #[must_use]
    pub fn common_ancestor(&self, left: NodeId, right: NodeId) -> Option<NodeId> {
        self.inner.core.borrow().log.common_ancestor(left, right)
    }

    /// Append `op` to `world`'s entry.
    pub async fn append(&self, world: &World, op: Operation<T>) -> Result<NodeId, EngineError> {
        let node = self.lookup(world)?;
        let next = self.inner.core.borrow_mut().log.apply(node, op);
        self.update(world, next).await?;
        self.lookup(world)
    }

    /// Replace `world`'s entry. At the top world of an external collection the
    /// change is first sent to the sink and the reconciled node is stored instead.
    pub async fn update(&self, world: &World, node: NodeId) -> Result<(), EngineError> {
        let old = self
            .inner
            .core
            .borrow()
            .entries
            .get(&world.id())
            .copied()
            .ok_or(EngineError::MissingEntry {
                collection: self.id(),
                world: world.id(),
            })?;

        let sink = match &self.inner.sink {
            Some(sink) if world.is_top() => Rc::clone(sink),
            _ => {
                self.inner.core.borrow_mut().entries.insert(world.id(), node);
                return Ok(());
            }
        };

        let (current, ops) = {
            let core = self.inner.core.borrow();
            (core.log.view(old), core.log.diff(old, node)?)
        };
        if ops.is_empty() {
            self.inner.core.borrow_mut().entries.insert(world.id(), node);
            return Ok(());
        }

        tracing::debug!(collection = %self.id(), ops = ops.len(), "sending edits to external sink");
        let applied = sink.send(&current, &ops).await?;

        let mut core = self.inner.core.borrow_mut();
        let reconciled = core.log.apply_all(old, applied);
        core.entries.insert(world.id(), reconciled);
        Ok(())
    }

    /// Fold `world`'s entry into its parent's. No-op if `world` never touched it.
    pub async fn merge(&self, world: &World) -> Result<(), EngineError> {
        let parent = world.parent().ok_or(EngineError::NoParent {
            world: world.id(),
            operation: "merge",
        })?;
        if !self.has_entry(world) {
            return Ok(());
        }
        let child_node = self.lookup(world)?;
        let parent_node = self.lookup(parent)?;
        let merged = self
            .inner
            .core
            .borrow_mut()
            .log
            .merge_with(parent_node, child_node, self.inner.policy)?;
        if merged == parent_node {
            return Ok(());
        }
        tracing::debug!(collection = %self.id(), child = %world.id(), parent = %parent.id(), "merged");
        self.update(parent, merged).await?;
        // The parent now carries edits its own parent has not seen.
        parent.touch(Rc::new(self.clone()));
        Ok(())
    }
}

impl<T: Element> Touched for Collection<T> {
    fn collection_id(&self) -> CollectionId {
        self.id()
    }

    fn merge_into_parent<'a>(&'a self, world: &'a World) -> LocalFut<'a, Result<(), EngineError>> {
        Box::pin(self.merge(world))
    }
}
