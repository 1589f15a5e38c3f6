//! Topic framing for messages sent over the wire.
//!
//! Every bus message travels as a topic frame:
//! `[topic length (4 bytes BE)][topic][payload length (4 bytes BE)][payload]`.
//! Receivers route on the topic without touching the payload.

use crate::Error;

/// Maximum payload size (4 MB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Maximum topic size in bytes.
pub const MAX_TOPIC_SIZE: usize = 1024;

/// Size of a length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame [`encode_topic_frame`] can produce.
pub const MAX_FRAME_SIZE: usize = 2 * LENGTH_PREFIX_SIZE + MAX_TOPIC_SIZE + MAX_MESSAGE_SIZE;

/// A decoded topic frame borrowing from the wire buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicFrame<'a> {
    /// Topic the payload is addressed to.
    pub topic: &'a str,
    /// Opaque payload bytes.
    pub payload: &'a [u8],
}

/// Encode a topic and payload into a single frame.
pub fn encode_topic_frame(topic: &str, payload: &[u8]) -> Result<Vec<u8>, Error> {
    if topic.len() > MAX_TOPIC_SIZE {
        return Err(Error::InvalidMessage(format!(
            "topic size {} exceeds maximum {}",
            topic.len(),
            MAX_TOPIC_SIZE
        )));
    }
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let mut frame =
        Vec::with_capacity(2 * LENGTH_PREFIX_SIZE + topic.len() + payload.len());
    frame.extend_from_slice(&(topic.len() as u32).to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a topic frame.
pub fn decode_topic_frame(frame: &[u8]) -> Result<TopicFrame<'_>, Error> {
    let (topic_len, rest) = read_length_prefix(frame, MAX_TOPIC_SIZE)?;
    if rest.len() < topic_len {
        return Err(Error::InvalidMessage(format!(
            "topic incomplete: have {}, need {}",
            rest.len(),
            topic_len
        )));
    }
    let topic = std::str::from_utf8(&rest[..topic_len])
        .map_err(|e| Error::InvalidMessage(format!("topic is not utf-8: {}", e)))?;

    let (payload_len, rest) = read_length_prefix(&rest[topic_len..], MAX_MESSAGE_SIZE)?;
    if rest.len() < payload_len {
        return Err(Error::InvalidMessage(format!(
            "payload incomplete: have {}, need {}",
            rest.len(),
            payload_len
        )));
    }

    Ok(TopicFrame {
        topic,
        payload: &rest[..payload_len],
    })
}

/// Read a length prefix from a byte slice.
///
/// Returns the length and a slice starting after the prefix.
fn read_length_prefix(data: &[u8], max: usize) -> Result<(usize, &[u8]), Error> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(Error::InvalidMessage(format!(
            "buffer too short for length prefix: {} < {}",
            data.len(),
            LENGTH_PREFIX_SIZE
        )));
    }

    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    header.copy_from_slice(&data[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_be_bytes(header) as usize;
    if len > max {
        return Err(Error::InvalidMessage(format!(
            "frame length {} exceeds maximum {}",
            len, max
        )));
    }

    Ok((len, &data[LENGTH_PREFIX_SIZE..]))
}
