//! Topic-scoped inbound mailbox and its readiness descriptor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::endpoint::{Delivery, Endpoint, Inbox};
use crate::error::Error;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Readiness token derived from a [`MessageQueue`].
///
/// A descriptor is only valid for the queue generation it was minted from.
/// It is not `Clone`: a new one is derived on every rebind instead.
#[derive(Debug, PartialEq, Eq)]
pub struct ReadinessDescriptor {
    queue_id: u64,
    generation: u64,
}

impl ReadinessDescriptor {
    pub fn queue_id(&self) -> u64 {
        self.queue_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Inbound mailbox bound to a topic on an endpoint.
#[derive(Debug)]
pub struct MessageQueue {
    id: u64,
    topic: String,
    inbox: Inbox,
    pending: VecDeque<Delivery>,
    generation: u64,
}

impl MessageQueue {
    /// Bind a new queue to `topic` on `endpoint`.
    pub fn bind<E: Endpoint + ?Sized>(topic: impl Into<String>, endpoint: &mut E) -> Self {
        let topic = topic.into();
        let inbox = endpoint.subscribe(&topic);
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(queue_id = id, topic = %topic, "message queue bound");

        Self {
            id,
            topic,
            inbox,
            pending: VecDeque::new(),
            generation: 0,
        }
    }

    /// Topic this queue is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Derive a fresh descriptor, invalidating every earlier one.
    pub fn descriptor(&mut self) -> ReadinessDescriptor {
        self.generation += 1;
        ReadinessDescriptor {
            queue_id: self.id,
            generation: self.generation,
        }
    }

    /// Check whether messages are waiting.
    pub fn poll(&mut self, descriptor: &ReadinessDescriptor) -> Result<bool, Error> {
        self.check(descriptor)?;
        self.fill();
        Ok(!self.pending.is_empty())
    }

    /// Take the next waiting message, if any.
    pub fn pop(&mut self, descriptor: &ReadinessDescriptor) -> Result<Option<Delivery>, Error> {
        self.check(descriptor)?;
        self.fill();
        Ok(self.pending.pop_front())
    }

    /// Take every waiting message.
    pub fn want_pop(&mut self, descriptor: &ReadinessDescriptor) -> Result<Vec<Delivery>, Error> {
        self.check(descriptor)?;
        self.fill();
        Ok(self.pending.drain(..).collect())
    }

    fn check(&self, descriptor: &ReadinessDescriptor) -> Result<(), Error> {
        if descriptor.queue_id != self.id || descriptor.generation != self.generation {
            return Err(Error::StaleDescriptor);
        }
        Ok(())
    }

    fn fill(&mut self) {
        while let Ok(delivery) = self.inbox.try_recv() {
            self.pending.push_back(delivery);
        }
    }
}
