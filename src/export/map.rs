//! Export map building: turn a declared [`Export`] into the announced tree
//! and the path → closure registry the dispatcher serves calls from.
//!
//! The walk is depth-first and preorder; children appear in declaration
//! order. List positions become decimal path segments (`["list", "0"]`).

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::{Args, CallResult, DeferredFn, Export, PendingValue, SyncFn};
use crate::marshal::PlainError;
use crate::protocol::{ExportNode, Member, ScalarKind};

/// Result of walking a module once at startup.
pub struct ExportMap {
    /// Tree announced to the coordinator.
    pub tree: ExportNode,
    /// Callable leaves by path.
    pub registry: Registry,
}

impl ExportMap {
    pub fn build(export: &Export) -> Self {
        let mut registry = Registry::default();
        let mut path = Vec::new();
        let tree = walk(export, &mut path, &mut registry);
        Self { tree, registry }
    }
}

fn walk(export: &Export, path: &mut Vec<String>, registry: &mut Registry) -> ExportNode {
    match export {
        Export::Value(value) => classify(value),
        Export::Sync(f) => {
            registry.insert(path.clone(), Invocable::Sync(f.clone()));
            ExportNode::Function
        }
        Export::Deferred(f) => {
            registry.insert(path.clone(), Invocable::Deferred(f.clone()));
            ExportNode::AsyncFunction
        }
        Export::Pending(value) => {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(value.clone());
            }
            registry.insert(path.clone(), Invocable::Pending(value.clone()));
            ExportNode::Pending
        }
        Export::List(items) => {
            let children = items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    path.push(index.to_string());
                    let node = walk(item, path, registry);
                    path.pop();
                    node
                })
                .collect();
            ExportNode::List { children }
        }
        Export::Record(members) => {
            let children = members
                .iter()
                .map(|(key, member)| {
                    path.push(key.clone());
                    let node = walk(member, path, registry);
                    path.pop();
                    Member {
                        key: key.clone(),
                        node,
                    }
                })
                .collect();
            ExportNode::Record { children }
        }
    }
}

/// Classify plain data by its JSON shape.
fn classify(value: &Value) -> ExportNode {
    match value {
        Value::Null => ExportNode::Null,
        Value::Bool(_) => ExportNode::Scalar {
            kind: ScalarKind::Boolean,
        },
        Value::Number(_) => ExportNode::Scalar {
            kind: ScalarKind::Number,
        },
        Value::String(_) => ExportNode::Scalar {
            kind: ScalarKind::String,
        },
        Value::Array(items) => ExportNode::List {
            children: items.iter().map(classify).collect(),
        },
        Value::Object(map) => ExportNode::Record {
            children: map
                .iter()
                .map(|(key, value)| Member {
                    key: key.clone(),
                    node: classify(value),
                })
                .collect(),
        },
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Callable leaves keyed by their full path.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<Vec<String>, Invocable>,
}

impl Registry {
    fn insert(&mut self, path: Vec<String>, invocable: Invocable) {
        self.entries.insert(path, invocable);
    }

    pub fn get(&self, path: &[String]) -> Option<&Invocable> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered paths, sorted.
    pub fn paths(&self) -> Vec<&[String]> {
        let mut paths: Vec<&[String]> = self.entries.keys().map(Vec::as_slice).collect();
        paths.sort();
        paths
    }
}

/// A callable leaf, already bound to its receiver.
#[derive(Clone)]
pub enum Invocable {
    Sync(SyncFn),
    Deferred(DeferredFn),
    Pending(PendingValue),
}

/// What invoking a leaf yields.
pub enum Invocation {
    /// The call has already finished.
    Ready(CallResult),
    /// The call finishes when this future does.
    Pending(BoxFuture<'static, CallResult>),
}

impl Invocable {
    /// Invoke with `args`. Panics inside the export are caught and turned
    /// into error outcomes.
    pub fn invoke(&self, args: Args) -> Invocation {
        match self {
            Self::Sync(f) => Invocation::Ready(
                panic::catch_unwind(AssertUnwindSafe(|| f(args)))
                    .unwrap_or_else(|payload| Err(PlainError::from_panic(payload))),
            ),
            Self::Deferred(f) => match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
                Ok(future) => Invocation::Pending(guard(future)),
                Err(payload) => Invocation::Ready(Err(PlainError::from_panic(payload))),
            },
            // A pending value ignores its arguments.
            Self::Pending(value) => Invocation::Pending(guard(value.clone().boxed())),
        }
    }

    pub fn node(&self) -> ExportNode {
        match self {
            Self::Sync(_) => ExportNode::Function,
            Self::Deferred(_) => ExportNode::AsyncFunction,
            Self::Pending(_) => ExportNode::Pending,
        }
    }
}

fn guard(future: BoxFuture<'static, CallResult>) -> BoxFuture<'static, CallResult> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .map(|outcome| outcome.unwrap_or_else(|payload| Err(PlainError::from_panic(payload))))
        .boxed()
}
