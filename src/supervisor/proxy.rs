//! Mirror of a worker's exported surface.
//!
//! Lists and records are rebuilt as-is; callable leaves become [`Stub`]s
//! bound to their path. Scalars and nulls were announced by kind only, so
//! they stay [`Proxy::Opaque`]: the placeholder keeps list positions intact
//! but has no value to read.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{RpcError, RpcResult};
use super::link::Link;
use crate::protocol::{ExportNode, ScalarKind};

/// How the worker runs a callable leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Sync,
    Deferred,
    Pending,
}

/// Kind of a leaf whose value stays on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpaqueKind {
    Scalar(ScalarKind),
    Null,
}

/// Reconstructed export tree.
#[derive(Debug, Clone)]
pub enum Proxy {
    Stub(Stub),
    List(Vec<Proxy>),
    Record(Vec<(String, Proxy)>),
    Opaque(OpaqueKind),
}

impl Proxy {
    pub(crate) fn build(tree: &ExportNode, link: &Arc<Link>) -> Self {
        let mut path = Vec::new();
        Self::build_at(tree, &mut path, link)
    }

    fn build_at(node: &ExportNode, path: &mut Vec<String>, link: &Arc<Link>) -> Self {
        let stub = |kind| {
            Self::Stub(Stub {
                path: path.clone().into(),
                kind,
                link: link.clone(),
            })
        };

        match node {
            ExportNode::Function => stub(CallableKind::Sync),
            ExportNode::AsyncFunction => stub(CallableKind::Deferred),
            ExportNode::Pending => stub(CallableKind::Pending),
            ExportNode::Scalar { kind } => Self::Opaque(OpaqueKind::Scalar(*kind)),
            ExportNode::Null => Self::Opaque(OpaqueKind::Null),
            ExportNode::List { children } => Self::List(
                children
                    .iter()
                    .enumerate()
                    .map(|(index, child)| {
                        path.push(index.to_string());
                        let proxy = Self::build_at(child, path, link);
                        path.pop();
                        proxy
                    })
                    .collect(),
            ),
            ExportNode::Record { children } => Self::Record(
                children
                    .iter()
                    .map(|member| {
                        path.push(member.key.clone());
                        let proxy = Self::build_at(&member.node, path, link);
                        path.pop();
                        (member.key.clone(), proxy)
                    })
                    .collect(),
            ),
        }
    }

    /// Child by key. List children are addressed by their decimal index.
    pub fn get(&self, key: &str) -> Option<&Proxy> {
        match self {
            Self::Record(members) => members.iter().find(|(k, _)| k == key).map(|(_, p)| p),
            Self::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Child of a list by position.
    pub fn index(&self, index: usize) -> Option<&Proxy> {
        match self {
            Self::List(items) => items.get(index),
            _ => None,
        }
    }

    /// Descend along `path`.
    pub fn at<S: AsRef<str>>(&self, path: &[S]) -> Option<&Proxy> {
        path.iter()
            .try_fold(self, |node, key| node.get(key.as_ref()))
    }

    /// The stub, if this node is callable.
    pub fn stub(&self) -> Option<&Stub> {
        match self {
            Self::Stub(stub) => Some(stub),
            _ => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }

    /// Record keys in announced order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Record(members) => members.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Every stub in the tree, depth-first.
    pub fn stubs(&self) -> Vec<&Stub> {
        let mut out = Vec::new();
        self.collect_stubs(&mut out);
        out
    }

    fn collect_stubs<'a>(&'a self, out: &mut Vec<&'a Stub>) {
        match self {
            Self::Stub(stub) => out.push(stub),
            Self::List(items) => items.iter().for_each(|p| p.collect_stubs(out)),
            Self::Record(members) => members.iter().for_each(|(_, p)| p.collect_stubs(out)),
            Self::Opaque(_) => {}
        }
    }
}

/// Remote-call stub for one callable export.
#[derive(Clone)]
pub struct Stub {
    path: Arc<[String]>,
    kind: CallableKind,
    link: Arc<Link>,
}

impl Stub {
    /// Path from the module root to this export.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    /// Invoke the export with `args`.
    ///
    /// Resolves to `None` when the worker's export produced no value. Fails
    /// at once, without sending, if the worker is dead.
    pub async fn call(&self, args: Vec<Value>) -> RpcResult<Option<Value>> {
        self.link.call(self.path.to_vec(), args).await
    }

    /// Invoke and deserialize the result. No value reads as `null`.
    pub async fn call_as<T: DeserializeOwned>(&self, args: Vec<Value>) -> RpcResult<T> {
        let value = self.call(args).await?.unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(RpcError::DeserializeFailed)
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("path", &self.path.join("."))
            .field("kind", &self.kind)
            .finish()
    }
}
