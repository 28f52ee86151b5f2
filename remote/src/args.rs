//! Server-side parameter bindings.
//!
//! A request's parameters arrive untyped. The procedure claims each one by name
//! and type, which turns it into a real [`Weight`] or [`Collection`] owned by the
//! request's top world. After the procedure's world finishes, every claimed
//! binding is read back out and encoded for the response.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use opal_engine::{Collection, Context, Element, Weight, World};
use opal_types::wire::Tagged;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::RemoteError;

/// A weight parameter: the value the caller sent, plus the channel to publish into.
#[derive(Debug, Clone)]
pub struct RemoteWeight<T> {
    name: String,
    weight: Weight<T>,
    input: Option<T>,
    owner: RemoteArgs,
}

impl<T> RemoteWeight<T> {
    #[must_use]
    pub fn handle(&self) -> &Weight<T> {
        &self.weight
    }

    /// The caller's value. Sending none is recorded as the caller's mistake.
    pub fn require_input(&self) -> Result<&T, RemoteError> {
        self.input
            .as_ref()
            .ok_or_else(|| self.owner.fail(&self.name, "no input value"))
    }
}

trait Encode {
    fn encode(&self, top: &Context, child: &World) -> Result<Tagged, RemoteError>;
}

struct WeightResult<T>(Weight<T>);

impl<T: Serialize + Clone + 'static> Encode for WeightResult<T> {
    fn encode(&self, top: &Context, child: &World) -> Result<Tagged, RemoteError> {
        match top.try_get(&self.0, child) {
            Some(Ok(value)) => Ok(Tagged::Weight(Some(serde_json::to_value(value)?))),
            Some(Err(_)) | None => Ok(Tagged::Weight(None)),
        }
    }
}

struct CollectionResult<T>(Collection<T>);

impl<T: Element + Serialize> Encode for CollectionResult<T> {
    fn encode(&self, top: &Context, child: &World) -> Result<Tagged, RemoteError> {
        let edit = top.diff_child(child, &self.0)?;
        let ops = edit
            .into_operations()
            .into_iter()
            .map(|op| op.try_map(serde_json::to_value).map(Tagged::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tagged::Collection(ops))
    }
}

#[derive(Clone)]
pub struct RemoteArgs {
    inner: Rc<ArgsInner>,
}

struct ArgsInner {
    top: Context,
    order: Vec<String>,
    unclaimed: RefCell<HashMap<String, Tagged>>,
    claimed: RefCell<Vec<(String, Box<dyn Encode>)>>,
    failure: RefCell<Option<(String, String)>>,
}

impl fmt::Debug for RemoteArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteArgs")
            .field("params", &self.inner.order)
            .field("claimed", &self.inner.claimed.borrow().len())
            .finish_non_exhaustive()
    }
}

impl RemoteArgs {
    /// `params` must already be validated: unique names, `Weight`/`Node` tags only.
    pub(crate) fn new(top: Context, params: Vec<(String, Tagged)>) -> Self {
        let order = params.iter().map(|(name, _)| name.clone()).collect();
        Self {
            inner: Rc::new(ArgsInner {
                top,
                order,
                unclaimed: RefCell::new(params.into_iter().collect()),
                claimed: RefCell::new(Vec::new()),
                failure: RefCell::new(None),
            }),
        }
    }

    pub fn weight<T>(&self, name: &str) -> Result<RemoteWeight<T>, RemoteError>
    where
        T: Serialize + DeserializeOwned + Clone + 'static,
    {
        let input = match self.claim(name)? {
            Tagged::Weight(value) => value
                .map(serde_json::from_value::<T>)
                .transpose()
                .map_err(|err| self.fail(name, format!("undecodable weight: {err}")))?,
            other => return Err(self.fail(name, format!("expected Weight, got {}", other.kind()))),
        };
        let weight = self.inner.top.weight::<T>();
        self.inner
            .claimed
            .borrow_mut()
            .push((name.to_string(), Box::new(WeightResult(weight.clone()))));
        Ok(RemoteWeight {
            name: name.to_string(),
            weight,
            input,
            owner: self.clone(),
        })
    }

    pub fn collection<T>(&self, name: &str) -> Result<Collection<T>, RemoteError>
    where
        T: Element + Serialize + DeserializeOwned,
    {
        let values = match self.claim(name)? {
            Tagged::Node(values) => decode_node::<T>(values)
                .map_err(|err| self.fail(name, format!("undecodable node: {err}")))?,
            other => return Err(self.fail(name, format!("expected Node, got {}", other.kind()))),
        };
        let collection = self.inner.top.collection_from(values);
        self.inner
            .claimed
            .borrow_mut()
            .push((name.to_string(), Box::new(CollectionResult(collection.clone()))));
        Ok(collection)
    }

    /// The first binding failure, if the procedure hit one.
    pub(crate) fn failure(&self) -> Option<RemoteError> {
        self.inner
            .failure
            .borrow()
            .as_ref()
            .map(|(name, message)| RemoteError::binding(name.clone(), message.clone()))
    }

    /// Encode every parameter for the response. Unclaimed parameters come back
    /// empty so the caller has nothing to replay for them.
    pub(crate) fn encode(&self, child: &World) -> Result<BTreeMap<String, Tagged>, RemoteError> {
        let mut out = BTreeMap::new();
        for (name, binding) in self.inner.claimed.borrow().iter() {
            out.insert(name.clone(), binding.encode(&self.inner.top, child)?);
        }
        for (name, tagged) in self.inner.unclaimed.borrow().iter() {
            let empty = match tagged {
                Tagged::Node(_) => Tagged::Collection(Vec::new()),
                _ => Tagged::Weight(None),
            };
            out.insert(name.clone(), empty);
        }
        Ok(out)
    }

    fn claim(&self, name: &str) -> Result<Tagged, RemoteError> {
        if let Some(tagged) = self.inner.unclaimed.borrow_mut().remove(name) {
            return Ok(tagged);
        }
        let message = if self.inner.order.iter().any(|n| n == name) {
            "claimed more than once"
        } else {
            "missing parameter"
        };
        Err(self.fail(name, message))
    }

    fn fail(&self, name: &str, message: impl Into<String>) -> RemoteError {
        let message = message.into();
        tracing::debug!(param = name, %message, "binding failed");
        let mut failure = self.inner.failure.borrow_mut();
        if failure.is_none() {
            *failure = Some((name.to_string(), message.clone()));
        }
        RemoteError::binding(name, message)
    }
}

fn decode_node<T: DeserializeOwned>(values: Vec<Value>) -> Result<Vec<T>, serde_json::Error> {
    values.into_iter().map(serde_json::from_value).collect()
}
