//! Declared export schemas for worker modules.
//!
//! A worker module describes its surface explicitly: every member is one of
//! a closed set of kinds (value, synchronous function, deferred function,
//! pending value, list, record). Functions are closures that already own
//! whatever receiver they need, so nothing has to be rebound at call time.
//!
//! # Example
//!
//! ```ignore
//! use runworker::export::{Args, Export};
//!
//! let module = Export::record()
//!     .with("add", Export::sync(|args: Args| {
//!         let (a, b): (i64, i64) = (args.get(0)?, args.get(1)?);
//!         Ok(serde_json::json!(a + b))
//!     }))
//!     .with("version", Export::value("1.2.0"));
//! ```

pub mod map;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::marshal::PlainError;

pub use map::{ExportMap, Invocable, Invocation, Registry};

/// Outcome of one invocation. `Ok(None)` means the call produced no value.
pub type CallResult = Result<Option<Value>, PlainError>;

/// Synchronous export.
pub type SyncFn = Arc<dyn Fn(Args) -> CallResult + Send + Sync>;

/// Export whose result must be awaited.
pub type DeferredFn = Arc<dyn Fn(Args) -> BoxFuture<'static, CallResult> + Send + Sync>;

/// A deferred value; every invocation awaits the same outcome.
pub type PendingValue = Shared<BoxFuture<'static, CallResult>>;

/// One member of a module's exported surface.
#[derive(Clone)]
pub enum Export {
    /// Plain data. Arrays and objects are walked like lists and records.
    Value(Value),
    Sync(SyncFn),
    Deferred(DeferredFn),
    Pending(PendingValue),
    List(Vec<Export>),
    Record(Vec<(String, Export)>),
}

impl Export {
    /// Start a record; members keep insertion order.
    pub fn record() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// Start a list.
    pub fn list() -> ListBuilder {
        ListBuilder::default()
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    /// A function that completes immediately.
    pub fn sync<F, R>(f: F) -> Self
    where
        F: Fn(Args) -> Result<R, PlainError> + Send + Sync + 'static,
        R: IntoReturn,
    {
        Self::Sync(Arc::new(move |args| f(args).and_then(IntoReturn::into_return)))
    }

    /// A function whose result must be awaited.
    pub fn deferred<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, PlainError>> + Send + 'static,
        R: IntoReturn,
    {
        Self::Deferred(Arc::new(move |args| {
            f(args)
                .map(|outcome| outcome.and_then(IntoReturn::into_return))
                .boxed()
        }))
    }

    /// A value that becomes available later.
    ///
    /// The future starts running when the module's exports are built inside
    /// a tokio runtime, not on the first call. A panic settles the value as
    /// an error.
    pub fn pending<Fut, R>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<R, PlainError>> + Send + 'static,
        R: IntoReturn,
    {
        let future: BoxFuture<'static, CallResult> = AssertUnwindSafe(future)
            .catch_unwind()
            .map(|outcome| {
                outcome
                    .unwrap_or_else(|payload| Err(PlainError::from_panic(payload)))
                    .and_then(IntoReturn::into_return)
            })
            .boxed();
        Self::Pending(future.shared())
    }

    /// A synchronous function bound to `receiver`.
    ///
    /// The closure sees the receiver on every call, the same as calling the
    /// method directly on its owner.
    pub fn method<T, F, R>(receiver: Arc<T>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, Args) -> Result<R, PlainError> + Send + Sync + 'static,
        R: IntoReturn,
    {
        Self::sync(move |args| f(&receiver, args))
    }

    /// A deferred function bound to `receiver`.
    pub fn async_method<T, F, Fut, R>(receiver: Arc<T>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, PlainError>> + Send + 'static,
        R: IntoReturn,
    {
        Self::deferred(move |args| f(receiver.clone(), args))
    }
}

impl From<Value> for Export {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Sync(_) => f.write_str("Sync(..)"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Pending(_) => f.write_str("Pending(..)"),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Record(members) => f.debug_tuple("Record").field(members).finish(),
        }
    }
}

/// Builder for [`Export::Record`].
#[derive(Debug, Default)]
pub struct RecordBuilder {
    members: Vec<(String, Export)>,
}

impl RecordBuilder {
    /// Add a member. Re-using a key replaces the earlier member in place.
    pub fn with(mut self, key: impl Into<String>, export: impl Into<Export>) -> Self {
        let key = key.into();
        let export = export.into();
        match self.members.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = export,
            None => self.members.push((key, export)),
        }
        self
    }

    pub fn build(self) -> Export {
        Export::Record(self.members)
    }
}

impl From<RecordBuilder> for Export {
    fn from(builder: RecordBuilder) -> Self {
        builder.build()
    }
}

/// Builder for [`Export::List`].
#[derive(Debug, Default)]
pub struct ListBuilder {
    items: Vec<Export>,
}

impl ListBuilder {
    pub fn push(mut self, export: impl Into<Export>) -> Self {
        self.items.push(export.into());
        self
    }

    pub fn build(self) -> Export {
        Export::List(self.items)
    }
}

impl From<ListBuilder> for Export {
    fn from(builder: ListBuilder) -> Self {
        builder.build()
    }
}

// ============================================================================
// Arguments and return values
// ============================================================================

/// Positional call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument at `index`.
    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Deserialize the argument at `index`.
    ///
    /// A missing argument reads as `null`, so `Option<T>` parameters may be
    /// left out.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, PlainError> {
        let value = self.0.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            PlainError::new(format!("argument {index}: {e}"))
                .with_field("code", "INVALID_ARGUMENT")
                .with_field("index", index)
        })
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Conversion from a handler's return type into the wire result.
pub trait IntoReturn {
    fn into_return(self) -> CallResult;
}

/// No value: the reply carries no `result` field.
impl IntoReturn for () {
    fn into_return(self) -> CallResult {
        Ok(None)
    }
}

impl IntoReturn for Value {
    fn into_return(self) -> CallResult {
        Ok(Some(self))
    }
}

impl IntoReturn for Option<Value> {
    fn into_return(self) -> CallResult {
        Ok(self)
    }
}

/// Typed return value, serialized at the boundary.
///
/// Values that cannot be represented as JSON fail the call instead of being
/// dropped.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoReturn for Json<T> {
    fn into_return(self) -> CallResult {
        serde_json::to_value(self.0).map(Some).map_err(|e| {
            PlainError::new(format!("result is not representable: {e}"))
                .with_field("code", "UNREPRESENTABLE_RESULT")
        })
    }
}
