//! Flattening errors into a record that can cross the process boundary.
//!
//! A [`PlainError`] keeps the message, an optional diagnostic trace and any
//! custom fields. It carries no type identity: the receiving side inspects
//! fields, never classes.

use std::any::Any;
use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transmissible error record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainError {
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,

    /// Diagnostic trace, one cause per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Any other fields the error carried.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PlainError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            fields: Map::new(),
        }
    }

    /// Flatten an error and its source chain.
    ///
    /// The message is the error's own `Display`; each source becomes one
    /// `caused by:` line of the trace.
    pub fn marshal<E: Error + ?Sized>(error: &E) -> Self {
        let mut trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        Self {
            message: error.to_string(),
            stack: (!trace.is_empty()).then(|| trace.join("\n")),
            fields: Map::new(),
        }
    }

    /// Turn a caught panic payload into an error record.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Self::new(message).with_field("panic", Value::Bool(true))
    }

    /// Attach a custom field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Look up a custom field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Shortcut for the conventional `code` field.
    pub fn code(&self) -> Option<&str> {
        self.field("code").and_then(Value::as_str)
    }

    /// Rebuild from an arbitrary payload.
    ///
    /// Objects are read field by field; anything else becomes the message.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone())
                .unwrap_or_else(|_| Self::new(value.to_string())),
            Value::String(message) => Self::new(message),
            other => Self::new(other.to_string()),
        }
    }
}

impl fmt::Display for PlainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for PlainError {}
