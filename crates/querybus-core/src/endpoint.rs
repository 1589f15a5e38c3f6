//! Local bus identity.
//!
//! An [`Endpoint`] can listen for and open peer links, reports link changes on
//! two status feeds, and moves topic-addressed payloads. Inbound payloads are
//! fanned out by a [`Router`] to every queue whose topic prefixes the
//! delivery topic.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use querybus_proto::BusMessage;

use crate::error::Error;
use crate::status::StatusFeed;
use crate::topic::matches_prefix;

/// Which side opened a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Accepted by `listen`.
    Incoming,
    /// Opened by `peer`.
    Outgoing,
}

/// Opaque reference to one remote link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    id: u64,
    direction: Direction,
}

impl PeerHandle {
    pub fn new(id: u64, direction: Direction) -> Self {
        Self { id, direction }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// A payload received on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Receiving side of a topic subscription.
pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

/// Local identity on the pub/sub bus.
pub trait Endpoint: Send {
    /// Bus identity of this endpoint.
    fn name(&self) -> &str;

    /// Accept incoming links. Listening again on the same address is a no-op.
    fn listen(&mut self, port: u16, address: &str) -> Result<(), Error>;

    /// Open an outgoing link. Completion is reported on the outgoing feed.
    fn peer(&mut self, address: &str, port: u16) -> Result<PeerHandle, Error>;

    /// Tear down a link.
    fn unpeer(&mut self, peer: PeerHandle);

    /// Status of links accepted by `listen`.
    fn incoming_status(&mut self) -> &mut StatusFeed;

    /// Status of links opened by `peer`.
    fn outgoing_status(&mut self) -> &mut StatusFeed;

    /// Receive every payload whose topic starts with `topic`.
    fn subscribe(&mut self, topic: &str) -> Inbox;

    /// Send a message to the peer on `topic`.
    fn publish(&mut self, topic: &str, message: &BusMessage) -> Result<(), Error>;
}

#[derive(Debug)]
struct Route {
    prefix: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// Fans inbound payloads out to topic subscriptions.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Arc<Mutex<Vec<Route>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription for `prefix`.
    pub fn subscribe(&self, prefix: &str) -> Inbox {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.lock().push(Route {
            prefix: prefix.to_string(),
            sender,
        });
        receiver
    }

    /// Deliver a payload to every matching subscription.
    ///
    /// Subscriptions whose inbox has been dropped are pruned. Returns the
    /// number of inboxes reached.
    pub fn route(&self, topic: &str, payload: &[u8]) -> usize {
        let mut routes = self.routes.lock();
        routes.retain(|route| !route.sender.is_closed());

        let mut reached = 0;
        for route in routes.iter() {
            if !matches_prefix(&route.prefix, topic) {
                continue;
            }
            let delivery = Delivery {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            if route.sender.send(delivery).is_ok() {
                reached += 1;
            }
        }

        if reached == 0 {
            tracing::trace!(topic, "no subscription for delivery");
        }
        reached
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        let mut routes = self.routes.lock();
        routes.retain(|route| !route.sender.is_closed());
        routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_handle() {
        let peer = PeerHandle::new(7, Direction::Incoming);
        assert_eq!(peer.id(), 7);
        assert_eq!(peer.direction(), Direction::Incoming);
        assert_ne!(peer, PeerHandle::new(7, Direction::Outgoing));
    }

    #[test]
    fn test_route_by_prefix() {
        let router = Router::new();
        let mut base = router.subscribe("bus/host/a");
        let mut other = router.subscribe("bus/host/b");

        assert_eq!(router.route("bus/host/a/1", b"x"), 1);

        let delivery = base.try_recv().unwrap();
        assert_eq!(delivery.topic, "bus/host/a/1");
        assert_eq!(delivery.payload, b"x");
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn test_route_prunes_dropped_inbox() {
        let router = Router::new();
        let inbox = router.subscribe("t");
        let _kept = router.subscribe("t");
        assert_eq!(router.subscription_count(), 2);

        drop(inbox);
        assert_eq!(router.route("t", b""), 1);
        assert_eq!(router.subscription_count(), 1);
    }

    #[test]
    fn test_route_unmatched() {
        let router = Router::new();
        let _inbox = router.subscribe("bus/host/a");
        assert_eq!(router.route("elsewhere", b"x"), 0);
    }
}
