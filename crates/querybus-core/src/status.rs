//! Connection status feeds.
//!
//! An endpoint reports link changes as tagged events on two feeds, one for
//! links accepted by `listen` and one for links opened by `peer`. Feeds are
//! drained by polling; nothing is pushed into the connection manager.

use tokio::sync::mpsc;

use crate::endpoint::PeerHandle;

/// Status tag carried by a feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTag {
    /// Link is up.
    Established,
    /// Link went away.
    Disconnected,
}

/// A tagged connectivity event for one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub tag: StatusTag,
    pub peer: PeerHandle,
}

impl StatusEvent {
    pub fn established(peer: PeerHandle) -> Self {
        Self {
            tag: StatusTag::Established,
            peer,
        }
    }

    pub fn disconnected(peer: PeerHandle) -> Self {
        Self {
            tag: StatusTag::Disconnected,
            peer,
        }
    }

    pub fn is_established(&self) -> bool {
        self.tag == StatusTag::Established
    }
}

/// Producer side of a status feed.
#[derive(Debug, Clone)]
pub struct StatusSender {
    sender: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusSender {
    /// Append an event. Returns false once the feed has been dropped.
    pub fn send(&self, event: StatusEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn established(&self, peer: PeerHandle) -> bool {
        self.send(StatusEvent::established(peer))
    }

    pub fn disconnected(&self, peer: PeerHandle) -> bool {
        self.send(StatusEvent::disconnected(peer))
    }
}

/// Append-only sequence of status events, drained by polling.
#[derive(Debug)]
pub struct StatusFeed {
    receiver: mpsc::UnboundedReceiver<StatusEvent>,
}

/// Create a connected sender/feed pair.
pub fn status_channel() -> (StatusSender, StatusFeed) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (StatusSender { sender }, StatusFeed { receiver })
}

impl StatusFeed {
    /// Drain every event currently queued without waiting.
    pub fn want_pop(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for at least one event, then drain whatever else is queued.
    ///
    /// Returns an empty batch only when every sender is gone.
    pub async fn need_pop(&mut self) -> Vec<StatusEvent> {
        match self.receiver.recv().await {
            Some(first) => {
                let mut events = vec![first];
                events.extend(self.want_pop());
                events
            }
            None => Vec::new(),
        }
    }
}
