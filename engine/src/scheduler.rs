//! Demand-driven cooperative scheduling.
//!
//! A [`Lazy`] holds at most one pending continuation: either the not-yet-started
//! body or the resumption of a parked `suspend()`. Continuations only run when
//! someone `acquire()`s the scheduler. Everything executes on one thread inside a
//! `LocalSet`, so bodies interleave only at `.await` points and never in parallel.
//!
//! ```text
//! Suspended(Initial) --acquire--> Runnable --suspend, inactive--> Suspended(Parked)
//!                                    ^                                  |
//!                                    +------------acquire---------------+
//! Runnable --body returns--> Finished(ok | error)
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;

use tokio::sync::oneshot;
use tokio::task;

use crate::EngineError;

/// Boxed single-threaded future.
pub type LocalFut<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// The deferred start of a body.
pub(crate) type Launch = Box<dyn FnOnce() -> LocalFut<'static, ()>>;

type FinishHook = Box<dyn FnOnce(&Result<(), EngineError>)>;

/// Why a scheduler is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// The body has not been started.
    Initial,
    /// The body called `suspend()` while nobody was waiting on it.
    Parked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LazyState {
    Suspended(Suspension),
    Runnable,
    Finished(Result<(), EngineError>),
}

enum Pending {
    Start(Launch),
    Resume(oneshot::Sender<()>),
}

#[derive(Default)]
pub struct Lazy {
    waiters: Cell<usize>,
    pending: RefCell<Option<Pending>>,
    state: RefCell<Option<LazyState>>,
    hooks: RefCell<Vec<FinishHook>>,
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("waiters", &self.waiters.get())
            .field("pending", &self.pending.borrow().is_some())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Lazy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> LazyState {
        self.state
            .borrow()
            .clone()
            .unwrap_or(LazyState::Suspended(Suspension::Initial))
    }

    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.get()
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.waiters.get() > 0
    }

    /// Store the body as the pending continuation without starting it.
    pub(crate) fn run(&self, launch: Launch) -> Result<(), EngineError> {
        let mut pending = self.pending.borrow_mut();
        if pending.is_some() || self.state.borrow().is_some() {
            return Err(EngineError::scheduling("body already scheduled"));
        }
        *pending = Some(Pending::Start(launch));
        Ok(())
    }

    /// Register interest and resume the pending continuation, if any.
    pub fn acquire(&self) {
        self.waiters.set(self.waiters.get() + 1);
        let pending = self.pending.borrow_mut().take();
        match pending {
            Some(Pending::Start(launch)) => {
                self.set_state(LazyState::Runnable);
                task::spawn_local(launch());
            }
            Some(Pending::Resume(resume)) => {
                self.set_state(LazyState::Runnable);
                // The receiver only disappears if the parked body was dropped.
                let _ = resume.send(());
            }
            None => {}
        }
    }

    pub fn release(&self) -> Result<(), EngineError> {
        let waiters = self.waiters.get();
        if waiters == 0 {
            tracing::error!("release without matching acquire");
            return Err(EngineError::scheduling("release without matching acquire"));
        }
        if self.pending.borrow().is_some() {
            tracing::error!("release while a continuation is pending");
            return Err(EngineError::scheduling(
                "release while a continuation is pending",
            ));
        }
        self.waiters.set(waiters - 1);
        Ok(())
    }

    /// Yield to whoever is waiting; park until the next `acquire()` if nobody is.
    pub async fn suspend(&self) -> Result<(), EngineError> {
        if self.active() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.borrow_mut();
            if pending.is_some() {
                tracing::error!("suspend with a continuation already pending");
                return Err(EngineError::scheduling(
                    "suspend with a continuation already pending",
                ));
            }
            *pending = Some(Pending::Resume(tx));
        }
        self.set_state(LazyState::Suspended(Suspension::Parked));
        rx.await
            .map_err(|_| EngineError::scheduling("parked continuation dropped"))
    }

    /// Resolves once the body has completed.
    pub fn finish(&self) -> LocalFut<'static, Result<(), EngineError>> {
        let (tx, rx) = oneshot::channel();
        self.on_finish(move |result| {
            let _ = tx.send(result.clone());
        });
        Box::pin(async move {
            rx.await
                .map_err(|_| EngineError::scheduling("world dropped before finishing"))?
        })
    }

    /// Run `hook` with the body's outcome, immediately if it already finished.
    pub fn on_finish(&self, hook: impl FnOnce(&Result<(), EngineError>) + 'static) {
        let finished = match self.state.borrow().as_ref() {
            Some(LazyState::Finished(result)) => Some(result.clone()),
            _ => None,
        };
        if let Some(result) = finished {
            hook(&result);
            return;
        }
        self.hooks.borrow_mut().push(Box::new(hook));
    }

    pub(crate) fn complete(&self, result: Result<(), EngineError>) {
        self.set_state(LazyState::Finished(result.clone()));
        let hooks = mem::take(&mut *self.hooks.borrow_mut());
        for hook in hooks {
            hook(&result);
        }
    }

    fn set_state(&self, state: LazyState) {
        let mut slot = self.state.borrow_mut();
        // Finished is sticky.
        if matches!(slot.as_ref(), Some(LazyState::Finished(_))) {
            return;
        }
        *slot = Some(state);
    }
}
