//! Wire format for remote execution.
//!
//! Every argument and result travels as a tagged JSON object:
//!
//! ```json
//! { "__opal_type": "Weight" | "Collection" | "Node" | "Add" | "Delete", "__opal_val": ... }
//! ```
//!
//! | Tag | Direction | Payload |
//! |-----|-----------|---------|
//! | `Weight` | request | the caller's published value, or `null` for a placeholder |
//! | `Node` | request | flat list of values (the caller's current view) |
//! | `Weight` | response | the published value, or `null` if never published |
//! | `Collection` | response | list of `Add`/`Delete` operations, root-to-tip |
//! | `Add` / `Delete` | response | a single value inside a `Collection` |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Operation;

/// Path of the remote execution endpoint.
pub const EXECUTE_PATH: &str = "/execute";

/// A kind-tagged argument or result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__opal_type", content = "__opal_val")]
pub enum Tagged {
    Weight(Option<Value>),
    Collection(Vec<Tagged>),
    Node(Vec<Value>),
    Add(Value),
    Delete(Value),
}

impl Tagged {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Tagged::Weight(_) => "Weight",
            Tagged::Collection(_) => "Collection",
            Tagged::Node(_) => "Node",
            Tagged::Add(_) => "Add",
            Tagged::Delete(_) => "Delete",
        }
    }

    /// Convert an `Add`/`Delete` tag back into an operation.
    #[must_use]
    pub fn into_operation(self) -> Option<Operation<Value>> {
        match self {
            Tagged::Add(v) => Some(Operation::Add(v)),
            Tagged::Delete(v) => Some(Operation::Delete(v)),
            _ => None,
        }
    }
}

impl From<Operation<Value>> for Tagged {
    fn from(op: Operation<Value>) -> Self {
        match op {
            Operation::Add(v) => Tagged::Add(v),
            Operation::Delete(v) => Tagged::Delete(v),
        }
    }
}

/// Body of `POST /execute`.
///
/// `code` names a procedure from the table both ends registered ahead of time.
/// It is never interpreted as source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub params: Vec<(String, Tagged)>,
}

/// Successful response of `POST /execute`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub params: BTreeMap<String, Tagged>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_params_are_pairs() {
        let req = ExecuteRequest {
            code: "square".to_string(),
            params: vec![
                ("out".to_string(), Tagged::Weight(None)),
                ("items".to_string(), Tagged::Node(vec![json!(1), json!(2)])),
            ],
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "code": "square",
                "params": [
                    ["out", {"__opal_type": "Weight", "__opal_val": null}],
                    ["items", {"__opal_type": "Node", "__opal_val": [1, 2]}]
                ]
            })
        );
    }

    #[test]
    fn response_collection_nests_operations() {
        let raw = json!({
            "params": {
                "items": {
                    "__opal_type": "Collection",
                    "__opal_val": [
                        {"__opal_type": "Add", "__opal_val": 3},
                        {"__opal_type": "Delete", "__opal_val": 1}
                    ]
                },
                "out": {"__opal_type": "Weight", "__opal_val": 9}
            }
        });
        let resp: ExecuteResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.params["out"], Tagged::Weight(Some(json!(9))));
        let Tagged::Collection(ops) = resp.params["items"].clone() else {
            panic!("expected collection");
        };
        let ops: Vec<_> = ops.into_iter().filter_map(Tagged::into_operation).collect();
        assert_eq!(ops, vec![Operation::Add(json!(3)), Operation::Delete(json!(1))]);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = json!({"__opal_type": "Source", "__opal_val": "fn main() {}"});
        assert!(serde_json::from_value::<Tagged>(raw).is_err());
    }
}
