//! Bus message types exchanged between an agent and its master.

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::Error;

/// A message carried inside a topic frame.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum BusMessage {
    /// Master assigns the topic this host should use for the session.
    TopicAssignment {
        /// The assigned topic.
        topic: String,
    },
    /// Master registers a query subscription.
    Subscribe(QuerySubscription),
    /// Master withdraws a previously registered query.
    Unsubscribe {
        /// Query text exactly as it was subscribed.
        query: String,
    },
    /// Host is bound to the assigned topic and accepts queries.
    Ready {
        /// Reporting host.
        host: String,
    },
    /// Non-fatal condition reported by the host.
    Warning {
        /// Reporting host.
        host: String,
        /// Human readable description.
        message: String,
    },
    /// Rejected request reported by the host.
    Error {
        /// Reporting host.
        host: String,
        /// Human readable description.
        message: String,
    },
    /// A row change for a tracked query.
    Event(QueryEvent),
}

/// A query subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct QuerySubscription {
    /// Raw query text.
    pub query: String,
    /// Event directive (`ADD`, `REMOVED` or `BOTH`).
    pub event: String,
    /// Send the initial result set as `Added` events.
    pub initial_dump: bool,
}

impl QuerySubscription {
    /// Create a subscription without an initial dump.
    pub fn new(query: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            event: event.into(),
            initial_dump: false,
        }
    }

    /// Request the initial result set.
    pub fn with_initial_dump(mut self) -> Self {
        self.initial_dump = true;
        self
    }
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Row appeared in the result set.
    Added,
    /// Row left the result set.
    Removed,
}

/// A row change for a tracked query.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct QueryEvent {
    /// Reporting host.
    pub host: String,
    /// Query text the row belongs to.
    pub query: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Column names.
    pub columns: Vec<String>,
    /// Row values, aligned with `columns`.
    pub values: Vec<String>,
}

impl BusMessage {
    /// Create a topic assignment.
    pub fn topic_assignment(topic: impl Into<String>) -> Self {
        BusMessage::TopicAssignment {
            topic: topic.into(),
        }
    }

    /// Create a subscription message.
    pub fn subscribe(query: impl Into<String>, event: impl Into<String>) -> Self {
        BusMessage::Subscribe(QuerySubscription::new(query, event))
    }

    /// Create an unsubscribe message.
    pub fn unsubscribe(query: impl Into<String>) -> Self {
        BusMessage::Unsubscribe {
            query: query.into(),
        }
    }

    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::TopicAssignment { .. } => "topic_assignment",
            BusMessage::Subscribe(_) => "subscribe",
            BusMessage::Unsubscribe { .. } => "unsubscribe",
            BusMessage::Ready { .. } => "ready",
            BusMessage::Warning { .. } => "warning",
            BusMessage::Error { .. } => "error",
            BusMessage::Event(_) => "event",
        }
    }
}

/// Serialize a message payload.
pub fn encode_message(message: &BusMessage) -> Result<Vec<u8>, Error> {
    rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| Error::Serialization(format!("failed to serialize message: {}", e)))
}

/// Deserialize a message payload.
///
/// The payload is copied into an aligned buffer first since frame payloads
/// sit at arbitrary offsets.
pub fn decode_message(payload: &[u8]) -> Result<BusMessage, Error> {
    if payload.is_empty() {
        return Err(Error::Deserialization("empty payload".to_string()));
    }

    let mut aligned = AlignedVec::<16>::with_capacity(payload.len());
    aligned.extend_from_slice(payload);

    rkyv::from_bytes::<BusMessage, rkyv::rancor::Error>(aligned.as_slice())
        .map_err(|e| Error::Deserialization(format!("failed to decode message: {}", e)))
}
