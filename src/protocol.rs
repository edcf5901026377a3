//! Wire types shared by the coordinator and its workers.
//!
//! Every message is one JSON object per line (NDJSON) on the worker's
//! stdin/stdout. Each envelope carries `"ref": "runWorker"`; lines that are
//! not JSON or carry a different `ref` belong to someone else and are
//! skipped by both sides.
//!
//! ```text
//! coordinator ── init / call / emit ──────────▶ worker
//! coordinator ◀── content / call-ret / emit ─── worker
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::marshal::PlainError;

/// Tag carried by every envelope of this protocol.
pub const PROTOCOL_TAG: &str = "runWorker";

/// Version of the value contract, announced with the export tree.
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Envelope
// ============================================================================

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Always [`PROTOCOL_TAG`] for envelopes built by this crate.
    #[serde(rename = "ref")]
    pub tag: String,
    /// Command and payload.
    #[serde(flatten)]
    pub message: Message,
}

/// Command-specific payload, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum Message {
    /// Coordinator → worker: load this module (deferred load mode only).
    Init { module_path: String },

    /// Coordinator → worker: invoke the export at `function_path`.
    Call {
        id: String,
        function_path: Vec<String>,
        arguments: Vec<Value>,
    },

    /// Worker → coordinator: outcome of the call with the same `id`.
    #[serde(rename = "call-ret")]
    CallReturn {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<PlainError>,
        /// `None` when the call produced no value; `Some(Value::Null)` for an
        /// explicit null.
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "present"
        )]
        result: Option<Value>,
    },

    /// Worker → coordinator: the export tree, sent exactly once.
    Content {
        version: u32,
        export_tree: ExportNode,
    },

    /// Either direction: a named custom event.
    Emit {
        event_name: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Keeps an explicit `null` as `Some(Value::Null)`; a missing field falls
/// back to `None` through `#[serde(default)]`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Wrap a message with the protocol tag.
    pub fn new(message: Message) -> Self {
        Self {
            tag: PROTOCOL_TAG.to_string(),
            message,
        }
    }

    pub fn init(module_path: impl Into<String>) -> Self {
        Self::new(Message::Init {
            module_path: module_path.into(),
        })
    }

    pub fn call(id: impl Into<String>, function_path: Vec<String>, arguments: Vec<Value>) -> Self {
        Self::new(Message::Call {
            id: id.into(),
            function_path,
            arguments,
        })
    }

    /// Build the reply for a finished call.
    pub fn call_return(id: impl Into<String>, outcome: Result<Option<Value>, PlainError>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (result, None),
            Err(error) => (None, Some(error)),
        };
        Self::new(Message::CallReturn {
            id: id.into(),
            error,
            result,
        })
    }

    pub fn content(export_tree: ExportNode) -> Self {
        Self::new(Message::Content {
            version: PROTOCOL_VERSION,
            export_tree,
        })
    }

    pub fn emit(event_name: impl Into<String>, payload: Value) -> Self {
        Self::new(Message::Emit {
            event_name: event_name.into(),
            payload,
        })
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Decode one transport line.
    ///
    /// Returns `Ok(None)` for traffic that is not ours: non-JSON lines and
    /// objects whose `ref` differs. An envelope that carries our tag but does
    /// not match any command is an error.
    pub fn from_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = match serde_json::from_str(line.trim()) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        if value.get("ref").and_then(Value::as_str) != Some(PROTOCOL_TAG) {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }

    /// Short command name, for logging.
    pub fn command(&self) -> &'static str {
        match self.message {
            Message::Init { .. } => "init",
            Message::Call { .. } => "call",
            Message::CallReturn { .. } => "call-ret",
            Message::Content { .. } => "content",
            Message::Emit { .. } => "emit",
        }
    }
}

// ============================================================================
// Export tree
// ============================================================================

/// Description of one member of a worker's exported surface.
///
/// Leaves carry only their kind. Scalars in particular are announced by type,
/// never by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportNode {
    Scalar { kind: ScalarKind },
    Null,
    /// Callable that completes immediately.
    Function,
    /// Callable whose result must be awaited.
    AsyncFunction,
    /// A deferred value that is not a function.
    Pending,
    List { children: Vec<ExportNode> },
    Record { children: Vec<Member> },
}

/// A keyed child of a record node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub key: String,
    pub node: ExportNode,
}

/// Primitive kind of a scalar export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Number,
    String,
    Boolean,
}

impl ExportNode {
    /// Whether the coordinator turns this node into a call stub.
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::AsyncFunction | Self::Pending)
    }

    /// Number of callable leaves below (and including) this node.
    pub fn callable_count(&self) -> usize {
        match self {
            Self::List { children } => children.iter().map(Self::callable_count).sum(),
            Self::Record { children } => children.iter().map(|m| m.node.callable_count()).sum(),
            node if node.is_callable() => 1,
            _ => 0,
        }
    }
}
