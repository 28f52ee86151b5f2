//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use opal_engine::{EngineError, ExternalSink, NodeConfig, Operation, SinkFut};
use opal_remote::builtins::register_builtins;
use opal_remote::{ProcedureRegistry, RemoteNode};
use serde::{Deserialize, Serialize};

/// A calendar entry. `id` is assigned by the calendar once the entry is real.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Meeting {
    pub hour: u32,
    pub title: String,
    pub id: Option<u32>,
}

impl Meeting {
    pub fn draft(hour: u32, title: &str) -> Self {
        Self {
            hour,
            title: title.to_string(),
            id: None,
        }
    }

    pub fn booked(hour: u32, title: &str, id: u32) -> Self {
        Self {
            id: Some(id),
            ..Self::draft(hour, title)
        }
    }
}

/// In-memory calendar that records every batch it is sent and assigns ids.
#[derive(Default)]
pub struct FakeCalendar {
    next_id: Cell<u32>,
    batches: Rc<RefCell<Vec<Vec<Operation<Meeting>>>>>,
    reject: bool,
}

impl FakeCalendar {
    pub fn new() -> (Self, Rc<RefCell<Vec<Vec<Operation<Meeting>>>>>) {
        let calendar = Self::default();
        let batches = Rc::clone(&calendar.batches);
        (calendar, batches)
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }
}

impl ExternalSink<Meeting> for FakeCalendar {
    fn send<'a>(
        &'a self,
        _current: &'a BTreeSet<Meeting>,
        ops: &'a [Operation<Meeting>],
    ) -> SinkFut<'a, Meeting> {
        Box::pin(async move {
            if self.reject {
                return Err(EngineError::sink("calendar is read-only"));
            }
            self.batches.borrow_mut().push(ops.to_vec());
            let applied = ops
                .iter()
                .cloned()
                .map(|op| {
                    op.map(|mut meeting| {
                        if meeting.id.is_none() {
                            self.next_id.set(self.next_id.get() + 1);
                            meeting.id = Some(self.next_id.get());
                        }
                        meeting
                    })
                })
                .collect();
            Ok(applied)
        })
    }
}

pub fn builtin_registry() -> ProcedureRegistry {
    let mut registry = ProcedureRegistry::new();
    register_builtins(&mut registry).expect("builtins register once");
    registry
}

/// Bind a node on an ephemeral port, serve it in the background, and return its base URL.
pub async fn spawn_node(registry: ProcedureRegistry) -> String {
    let config = NodeConfig {
        bind: "127.0.0.1:0".to_string(),
        ..NodeConfig::default()
    };
    let node = RemoteNode::bind(&config, registry)
        .await
        .expect("bind ephemeral port");
    let addr = node.local_addr();
    tokio::spawn(node.serve());
    format!("http://{addr}")
}
