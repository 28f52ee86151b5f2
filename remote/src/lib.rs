//! Remote execution of registered procedures.
//!
//! A node serves `POST /execute` for the procedures in its [`ProcedureRegistry`].
//! Callers use [`RemoteClient`] (or [`execute_at`]) from inside a world; the
//! node's results are replayed into the caller's world as ordinary `set`, `add`,
//! and `del` calls.

mod args;
pub mod builtins;
mod client;
mod error;
mod registry;
mod server;

pub use args::{RemoteArgs, RemoteWeight};
pub use client::{Binding, RemoteCall, RemoteClient, execute_at};
pub use error::RemoteError;
pub use registry::{ProcedureFut, ProcedureRegistry, RemoteProcedure};
pub use server::{RemoteNode, execute_request};
