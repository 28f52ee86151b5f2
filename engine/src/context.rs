//! The façade world bodies program against.
//!
//! A [`Context`] is bound to exactly one [`World`]. Every spawn, publish, read,
//! edit, and commit a body performs goes through it, which keeps all mutation on
//! the single engine thread and along explicit parent/child edges.

use std::collections::BTreeSet;
use std::future::Future;
use std::rc::Rc;

use opal_core::{LogError, MergePolicy, NodeId};
use opal_types::{Edit, Operation};

use crate::collection::{Element, ExternalSink};
use crate::{Collection, EngineError, Weight, World};

#[derive(Clone, Debug)]
pub struct Context {
    world: World,
}

impl Context {
    pub(crate) fn new(world: World) -> Self {
        Self { world }
    }

    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    // ------------------------------------------------------------------------
    // Worlds
    // ------------------------------------------------------------------------

    /// Spawn a child world. Its body does not start until the child is acquired.
    pub fn hypothetical<F, Fut>(&self, body: F) -> World
    where
        F: FnOnce(Context) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let child = World::child(&self.world);
        // A freshly created world has nothing pending, so scheduling cannot fail.
        if let Err(err) = child.run(body) {
            tracing::error!(world = %child.id(), error = %err, "failed to schedule body");
        }
        child
    }

    /// Run `child` to completion and fold every collection it edited into this world.
    ///
    /// A child can be committed once. Later attempts fail with
    /// [`EngineError::AlreadyCommitted`] and touch nothing.
    pub async fn commit(&self, child: &World) -> Result<(), EngineError> {
        self.require_child(child)?;
        if !child.mark_committed() {
            return Err(EngineError::AlreadyCommitted { world: child.id() });
        }
        child.acquire();
        child.finish().await?;
        for collection in child.touched() {
            collection.merge_into_parent(child).await?;
        }
        tracing::debug!(world = %self.world.id(), child = %child.id(), "committed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Weights
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn weight<T: Clone + 'static>(&self) -> Weight<T> {
        Weight::new(self.world.id())
    }

    /// Publish `value` from this world, then yield to whoever is waiting on it.
    pub async fn set<T: Clone + 'static>(&self, weight: &Weight<T>, value: T) -> Result<(), EngineError> {
        weight.set(&self.world, value);
        self.world.suspend().await
    }

    /// Run `child` until it publishes to `weight` (or fails) and return the value.
    pub async fn get<T: Clone + 'static>(&self, weight: &Weight<T>, child: &World) -> Result<T, EngineError> {
        child.acquire();
        let value = weight.get(child).await;
        let released = child.release();
        let value = value?;
        released?;
        Ok(value)
    }

    /// Peek at what `child` published without running it.
    #[must_use]
    pub fn try_get<T: Clone + 'static>(&self, weight: &Weight<T>, child: &World) -> Option<Result<T, EngineError>> {
        weight.try_get(child)
    }

    // ------------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn collection<T: Element>(&self) -> Collection<T> {
        self.collection_with_policy(Vec::new(), MergePolicy::default())
    }

    #[must_use]
    pub fn collection_from<T: Element>(&self, values: impl IntoIterator<Item = T>) -> Collection<T> {
        self.collection_with_policy(values, MergePolicy::default())
    }

    #[must_use]
    pub fn collection_with_policy<T: Element>(
        &self,
        values: impl IntoIterator<Item = T>,
        policy: MergePolicy,
    ) -> Collection<T> {
        Collection::new(&self.world, values.into_iter().collect(), policy, None)
    }

    /// A collection whose edits are sent to `sink` once they reach the top world.
    #[must_use]
    pub fn external_collection<T: Element>(
        &self,
        values: impl IntoIterator<Item = T>,
        sink: impl ExternalSink<T>,
    ) -> Collection<T> {
        Collection::new(
            &self.world,
            values.into_iter().collect(),
            MergePolicy::default(),
            Some(Rc::new(sink)),
        )
    }

    pub async fn add<T: Element>(&self, collection: &Collection<T>, value: T) -> Result<(), EngineError> {
        self.edit(collection, Operation::Add(value)).await
    }

    pub async fn del<T: Element>(&self, collection: &Collection<T>, value: T) -> Result<(), EngineError> {
        self.edit(collection, Operation::Delete(value)).await
    }

    pub async fn edit<T: Element>(&self, collection: &Collection<T>, op: Operation<T>) -> Result<(), EngineError> {
        collection.append(&self.world, op).await?;
        self.world.touch(Rc::new(collection.clone()));
        Ok(())
    }

    pub fn lookup<T: Element>(&self, collection: &Collection<T>) -> Result<NodeId, EngineError> {
        collection.lookup(&self.world)
    }

    pub fn view<T: Element>(&self, collection: &Collection<T>) -> Result<BTreeSet<T>, EngineError> {
        collection.view(&self.world)
    }

    /// The contents before this world's local edits: the nearest common ancestor
    /// of this world's entry and its parent's.
    pub fn clean_view<T: Element>(&self, collection: &Collection<T>) -> Result<BTreeSet<T>, EngineError> {
        let parent = self.parent("clean_view")?;
        let local = collection.lookup(&self.world)?;
        let inherited = collection.lookup(parent)?;
        let base = collection
            .common_ancestor(local, inherited)
            .ok_or(LogError::NoCommonAncestor {
                left: local,
                right: inherited,
            })?;
        Ok(collection.materialize(base))
    }

    /// Operations distinguishing this world's entry from its parent's.
    pub fn diff<T: Element>(&self, collection: &Collection<T>) -> Result<Edit<T>, EngineError> {
        let parent = self.parent("diff")?;
        let base = collection.lookup(parent)?;
        let overlay = collection.lookup(&self.world)?;
        Ok(Edit::new(collection.diff_nodes(base, overlay)?))
    }

    /// Operations that committing `child` would add to this world.
    pub fn diff_child<T: Element>(&self, child: &World, collection: &Collection<T>) -> Result<Edit<T>, EngineError> {
        self.require_child(child)?;
        let base = collection.lookup(&self.world)?;
        let overlay = collection.lookup(child)?;
        Ok(Edit::new(collection.diff_nodes(base, overlay)?))
    }

    fn parent(&self, operation: &'static str) -> Result<&World, EngineError> {
        self.world.parent().ok_or(EngineError::NoParent {
            world: self.world.id(),
            operation,
        })
    }

    fn require_child(&self, child: &World) -> Result<(), EngineError> {
        if child.is_child_of(&self.world) {
            Ok(())
        } else {
            Err(EngineError::NotChild {
                child: child.id(),
                parent: self.world.id(),
            })
        }
    }
}
