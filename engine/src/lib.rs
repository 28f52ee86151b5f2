//! Speculative execution over lazily scheduled worlds.
//!
//! A program runs inside [`opal`], which creates the top [`World`]. Bodies spawn
//! hypothetical child worlds through their [`Context`], read typed results back
//! through [`Weight`]s, and fold collection edits upward with `commit`. Only edits
//! that reach the top world are sent to an [`ExternalSink`].
//!
//! Everything runs on one thread inside a `tokio::task::LocalSet`; worlds make
//! progress only when acquired and interleave only at `.await` points.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::LocalSet;

mod collection;
mod config;
mod context;
mod error;
mod scheduler;
mod search;
mod weight;
mod world;

pub use collection::{Collection, Element, ExternalSink, SinkFut};
pub use config::{
    BIND_ENV, CONFIG_ENV, ClientConfig, ConfigError, DEFAULT_BIND, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_BODY_BYTES, LogConfig, NodeConfig, OpalConfig, config_path,
};
pub use context::Context;
pub use error::EngineError;
pub use scheduler::{Lazy, LazyState, LocalFut, Suspension};
pub use weight::Weight;
pub use world::World;

pub use opal_core::{LogError, MergePolicy, NodeId, PersistentLog};
pub use opal_types::{CollectionId, Edit, EditVisitor, Operation, WorldId};

/// Run `body` as the top world and return its value.
///
/// Creates a fresh `LocalSet`, so this may be awaited from any current-thread
/// runtime (including `#[tokio::test]`).
pub async fn opal<R, F, Fut>(body: F) -> Result<R, EngineError>
where
    R: 'static,
    F: FnOnce(Context) -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<R>> + 'static,
{
    LocalSet::new()
        .run_until(async move {
            let top = World::top();
            let (tx, rx) = oneshot::channel();
            top.run(move |ctx| async move {
                let value = body(ctx).await?;
                let _ = tx.send(value);
                Ok(())
            })?;

            top.acquire();
            let finished = top.finish().await;
            top.release()?;
            finished?;

            rx.await
                .map_err(|_| EngineError::scheduling("top world finished without a value"))
        })
        .await
}
