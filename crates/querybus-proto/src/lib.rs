//! querybus protocol types and serialization.
//!
//! This crate defines the wire format shared by an agent and its master:
//! topic frames that the transport routes on, and rkyv-encoded
//! [`BusMessage`] payloads inside them.
//!
//! # Modules
//!
//! - [`framing`] - Topic frame encoding and decoding
//! - [`message`] - Bus message types and payload codec
//! - [`error`] - Protocol error types
//!
//! # Usage
//!
//! ```ignore
//! use querybus_proto::{decode_message, encode_message, BusMessage};
//! use querybus_proto::framing::{decode_topic_frame, encode_topic_frame};
//!
//! let payload = encode_message(&BusMessage::topic_assignment("bus/host/a/1")).unwrap();
//! let frame = encode_topic_frame("bus/host/a", &payload).unwrap();
//!
//! let decoded = decode_topic_frame(&frame).unwrap();
//! let message = decode_message(decoded.payload).unwrap();
//! ```

pub mod error;
pub mod framing;
pub mod message;

pub use error::Error;

pub use framing::{decode_topic_frame, encode_topic_frame, TopicFrame};
pub use message::{
    decode_message, encode_message, BusMessage, ChangeKind, QueryEvent, QuerySubscription,
};

/// Protocol version for wire compatibility.
pub const PROTOCOL_VERSION: u32 = 1;
