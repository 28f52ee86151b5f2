//! Branches of speculative computation.
//!
//! A [`World`] wraps a [`Lazy`] scheduler with its place in the branch tree: a
//! fixed parent (none for the top world), weak links to the children it spawned,
//! and the collections it has edited. Handles are cheap `Rc` clones.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use opal_types::WorldId;

use crate::collection::Touched;
use crate::scheduler::{Lazy, LazyState, LocalFut};
use crate::{Context, EngineError};

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(1);

fn next_world_id() -> WorldId {
    WorldId::new(NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Clone)]
pub struct World {
    inner: Rc<WorldInner>,
}

struct WorldInner {
    id: WorldId,
    parent: Option<World>,
    subworlds: RefCell<Vec<Weak<WorldInner>>>,
    collections: RefCell<Vec<Rc<dyn Touched>>>,
    committed: Cell<bool>,
    lazy: Lazy,
}

impl World {
    /// Create a world with no parent. Only its collection updates reach external sinks.
    #[must_use]
    pub fn top() -> Self {
        let world = Self::with_parent(None);
        tracing::debug!(world = %world.id(), "top world created");
        world
    }

    pub(crate) fn child(parent: &World) -> Self {
        let world = Self::with_parent(Some(parent.clone()));
        parent
            .inner
            .subworlds
            .borrow_mut()
            .push(Rc::downgrade(&world.inner));
        tracing::debug!(world = %world.id(), parent = %parent.id(), "world created");
        world
    }

    fn with_parent(parent: Option<World>) -> Self {
        Self {
            inner: Rc::new(WorldInner {
                id: next_world_id(),
                parent,
                subworlds: RefCell::new(Vec::new()),
                collections: RefCell::new(Vec::new()),
                committed: Cell::new(false),
                lazy: Lazy::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> WorldId {
        self.inner.id
    }

    #[must_use]
    pub fn parent(&self) -> Option<&World> {
        self.inner.parent.as_ref()
    }

    #[must_use]
    pub fn is_top(&self) -> bool {
        self.inner.parent.is_none()
    }

    #[must_use]
    pub fn is_child_of(&self, other: &World) -> bool {
        self.parent().is_some_and(|parent| parent == other)
    }

    /// Children spawned from this world that are still referenced somewhere.
    #[must_use]
    pub fn subworlds(&self) -> Vec<World> {
        self.inner
            .subworlds
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| World { inner })
            .collect()
    }

    #[must_use]
    pub fn state(&self) -> LazyState {
        self.inner.lazy.state()
    }

    #[must_use]
    pub fn waiters(&self) -> usize {
        self.inner.lazy.waiters()
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.inner.lazy.active()
    }

    pub fn acquire(&self) {
        tracing::debug!(world = %self.id(), waiters = self.waiters() + 1, "acquire");
        self.inner.lazy.acquire();
    }

    pub fn release(&self) -> Result<(), EngineError> {
        tracing::debug!(world = %self.id(), "release");
        self.inner.lazy.release()
    }

    pub async fn suspend(&self) -> Result<(), EngineError> {
        if !self.active() {
            tracing::debug!(world = %self.id(), "parked");
        }
        self.inner.lazy.suspend().await
    }

    pub fn finish(&self) -> LocalFut<'static, Result<(), EngineError>> {
        self.inner.lazy.finish()
    }

    pub fn on_finish(&self, hook: impl FnOnce(&Result<(), EngineError>) + 'static) {
        self.inner.lazy.on_finish(hook);
    }

    /// Store `body` to run against a fresh [`Context`] on first acquire.
    pub fn run<F, Fut>(&self, body: F) -> Result<(), EngineError>
    where
        F: FnOnce(Context) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let weak = Rc::downgrade(&self.inner);
        let id = self.id();
        self.inner.lazy.run(Box::new(move || {
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let world = World { inner };
                let ctx = Context::new(world.clone());
                let outcome = AssertUnwindSafe(async move { body(ctx).await })
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(EngineError::Body {
                        world: id,
                        message: format!("{err:#}"),
                    }),
                    Err(payload) => Err(EngineError::Body {
                        world: id,
                        message: format!("panicked: {}", panic_message(payload.as_ref())),
                    }),
                };
                match &result {
                    Ok(()) => tracing::debug!(world = %id, "finished"),
                    Err(err) => tracing::warn!(world = %id, error = %err, "world body failed"),
                }
                world.inner.lazy.complete(result);
            })
        }))
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.inner.committed.get()
    }

    /// Returns false if this world was already committed.
    pub(crate) fn mark_committed(&self) -> bool {
        !self.inner.committed.replace(true)
    }

    pub(crate) fn touch(&self, collection: Rc<dyn Touched>) {
        let mut touched = self.inner.collections.borrow_mut();
        if touched.iter().all(|c| c.collection_id() != collection.collection_id()) {
            touched.push(collection);
        }
    }

    pub(crate) fn touched(&self) -> Vec<Rc<dyn Touched>> {
        self.inner.collections.borrow().clone()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl PartialEq for World {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for World {}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id())
            .field("parent", &self.parent().map(World::id))
            .field("state", &self.state())
            .field("waiters", &self.waiters())
            .finish()
    }
}
