//! Protocol messages
//!
//! Host → context: one [`InitMessage`].
//! Context → host: JSON objects discriminated by `type`:
//!
//! ```text
//! { "type": "progress",  "value": any }
//! { "type": "next",      "value": any }
//! { "type": "done",      "value": any }      // value absent = undefined
//! { "type": "cancelled" }
//! { "type": "error",     "error": any }
//! ```
//!
//! Anything else is not a protocol message and is dropped by the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};

use crate::runtime::cancel::CancellationHandle;

/// Owned bytes moved into the context with the initial message.
pub type Transferable = Vec<u8>;

/// First and only message the host sends to a context.
#[derive(Debug)]
pub struct InitMessage {
    pub data: Value,
    /// Flag to poll; `None` makes the context use a local one.
    pub cancellation: Option<CancellationHandle>,
    pub transfer: Vec<Transferable>,
}

/// Message a context posts to the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Progress {
        #[serde(default)]
        value: Value,
    },
    Next {
        #[serde(default)]
        value: Value,
    },
    Done {
        #[serde(default, deserialize_with = "present")]
        value: Option<Value>,
    },
    Cancelled {},
    Error {
        #[serde(default)]
        error: Value,
    },
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl WorkerMessage {
    /// Decode a raw message. `None` for anything that is not one of the
    /// five protocol messages.
    pub fn decode(raw: &Value) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        serde_json::from_value(raw.clone()).ok()
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> Value {
        match self {
            WorkerMessage::Progress { value } => json!({ "type": "progress", "value": value }),
            WorkerMessage::Next { value } => json!({ "type": "next", "value": value }),
            WorkerMessage::Done { value } => {
                let mut object = Map::new();
                object.insert("type".to_string(), json!("done"));
                if let Some(value) = value {
                    object.insert("value".to_string(), value.clone());
                }
                Value::Object(object)
            }
            WorkerMessage::Cancelled {} => json!({ "type": "cancelled" }),
            WorkerMessage::Error { error } => json!({ "type": "error", "error": error }),
        }
    }

    /// Whether this message ends the run.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerMessage::Done { .. } | WorkerMessage::Cancelled {} | WorkerMessage::Error { .. }
        )
    }
}

/// Sending half of a context's channel to the host.
///
/// Once the host terminates the context the port is closed and every post
/// is discarded.
#[derive(Debug, Clone)]
pub struct MessagePort {
    tx: Sender<Value>,
    closed: Arc<AtomicBool>,
}

impl MessagePort {
    pub fn new(
        tx: Sender<Value>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self { tx, closed }
    }

    /// Post a raw message. Returns false if it was discarded.
    pub fn post_raw(
        &self,
        message: Value,
    ) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(message).is_ok()
    }

    /// Post a protocol message.
    #[inline]
    pub fn post(
        &self,
        message: &WorkerMessage,
    ) -> bool {
        self.post_raw(message.encode())
    }

    /// Whether the host has terminated this context.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
