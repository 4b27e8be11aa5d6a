//! The message type carried on the bus.

use std::sync::Arc;

use uuid::Uuid;

/// A payload emitted by a worker, tagged with its origin and a unique id.
///
/// The id and origin are fixed at emission time. As the message moves through
/// a handler chain only the payload is replaced, via [`with_payload`].
///
/// Cloning is cheap for the identity fields; the payload is copied.
///
/// [`with_payload`]: DataMessage::with_payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    id: Arc<str>,
    origin: Arc<str>,
    payload: Vec<u8>,
}

impl DataMessage {
    /// Creates a message with a freshly generated v4 UUID.
    pub fn new(origin: impl Into<Arc<str>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string().into(),
            origin: origin.into(),
            payload: payload.into(),
        }
    }

    /// Creates a message with an explicit id.
    pub fn with_id(
        id: impl Into<Arc<str>>,
        origin: impl Into<Arc<str>>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
            payload: payload.into(),
        }
    }

    /// Unique id of this message.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the worker plugin that emitted this message.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Current payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the message and returns its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns the same message (same id and origin) carrying `payload`.
    pub fn with_payload(&self, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Arc::clone(&self.id),
            origin: Arc::clone(&self.origin),
            payload: payload.into(),
        }
    }
}
