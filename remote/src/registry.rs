//! The table of procedures a node is willing to run on a caller's behalf.
//!
//! Both ends agree on the table ahead of time; a request only ever names an
//! entry, it never carries code.

use std::collections::HashMap;
use std::sync::Arc;

use opal_engine::{Context, LocalFut};

use crate::RemoteError;
use crate::args::RemoteArgs;

pub type ProcedureFut = LocalFut<'static, anyhow::Result<()>>;

/// A procedure callable through `POST /execute`.
///
/// `call` runs as the body of a child world of a fresh top world. Parameters are
/// fetched by name and type from `args`; whatever the body publishes into them is
/// sent back to the caller once it finishes.
pub trait RemoteProcedure: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn call(&self, ctx: Context, args: RemoteArgs) -> ProcedureFut;
}

#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Arc<dyn RemoteProcedure>>,
}

impl ProcedureRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, procedure: Box<dyn RemoteProcedure>) -> Result<(), RemoteError> {
        let name = procedure.name().to_string();
        if self.procedures.contains_key(&name) {
            return Err(RemoteError::DuplicateProcedure { name });
        }
        tracing::debug!(procedure = %name, "registered");
        self.procedures.insert(name, Arc::from(procedure));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn RemoteProcedure>, RemoteError> {
        self.procedures
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownProcedure {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `(name, description)` pairs, sorted by name.
    #[must_use]
    pub fn describe(&self) -> Vec<(&str, &'static str)> {
        let mut entries: Vec<_> = self
            .procedures
            .iter()
            .map(|(name, procedure)| (name.as_str(), procedure.description()))
            .collect();
        entries.sort_unstable_by_key(|(name, _)| *name);
        entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}
