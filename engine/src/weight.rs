//! Single-value result channels from child worlds to their parent.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::rc::Rc;

use opal_types::WorldId;
use tokio::sync::oneshot;

use crate::{EngineError, World};

type Outcome<T> = Result<T, EngineError>;

/// A channel scoped to its home world with one slot per child that publishes into it.
pub struct Weight<T> {
    inner: Rc<WeightInner<T>>,
}

struct WeightInner<T> {
    home: WorldId,
    slots: RefCell<HashMap<WorldId, Rc<Slot<T>>>>,
}

impl<T> Clone for Weight<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Weight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weight")
            .field("home", &self.inner.home)
            .field("slots", &self.inner.slots.borrow().len())
            .finish()
    }
}

impl<T: Clone + 'static> Weight<T> {
    pub(crate) fn new(home: WorldId) -> Self {
        Self {
            inner: Rc::new(WeightInner {
                home,
                slots: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Resolve `world`'s slot. A slot that is already resolved keeps its first value.
    pub fn set(&self, world: &World, value: T) {
        let slot = self.slot(world);
        if !slot.resolve(Ok(value)) {
            tracing::warn!(world = %world.id(), "weight already set; keeping first value");
        }
    }

    /// Wait for `world`'s slot, or its failure.
    pub async fn get(&self, world: &World) -> Outcome<T> {
        let slot = self.slot(world);
        slot.wait().await
    }

    /// Peek at `world`'s slot without waiting.
    #[must_use]
    pub fn try_get(&self, world: &World) -> Option<Outcome<T>> {
        let slots = self.inner.slots.borrow();
        slots.get(&world.id()).and_then(|slot| slot.peek())
    }

    fn slot(&self, world: &World) -> Rc<Slot<T>> {
        if let Some(slot) = self.inner.slots.borrow().get(&world.id()) {
            return Rc::clone(slot);
        }

        let slot = Rc::new(Slot::default());
        self.inner
            .slots
            .borrow_mut()
            .insert(world.id(), Rc::clone(&slot));

        // Propagate the child's failure, or its silence, to readers.
        let weak = Rc::downgrade(&slot);
        let id = world.id();
        world.on_finish(move |result| {
            let Some(slot) = weak.upgrade() else {
                return;
            };
            let failure = match result {
                Err(err) => err.clone(),
                Ok(()) => EngineError::WeightUnset { world: id },
            };
            slot.resolve(Err(failure));
        });
        slot
    }
}

enum SlotState<T> {
    Pending(Vec<oneshot::Sender<Outcome<T>>>),
    Ready(Outcome<T>),
}

struct Slot<T> {
    state: RefCell<SlotState<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            state: RefCell::new(SlotState::Pending(Vec::new())),
        }
    }
}

impl<T: Clone> Slot<T> {
    /// Returns false if the slot was already resolved.
    fn resolve(&self, outcome: Outcome<T>) -> bool {
        let waiters = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                SlotState::Ready(_) => return false,
                SlotState::Pending(waiters) => {
                    let waiters = mem::take(waiters);
                    *state = SlotState::Ready(outcome.clone());
                    waiters
                }
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        true
    }

    fn peek(&self) -> Option<Outcome<T>> {
        match &*self.state.borrow() {
            SlotState::Ready(outcome) => Some(outcome.clone()),
            SlotState::Pending(_) => None,
        }
    }

    async fn wait(&self) -> Outcome<T> {
        let rx = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                SlotState::Ready(outcome) => return outcome.clone(),
                SlotState::Pending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        rx.await
            .map_err(|_| EngineError::scheduling("weight slot dropped while waiting"))?
    }
}
