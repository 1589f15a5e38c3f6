//! In-process endpoint.
//!
//! [`MemoryEndpoint`] implements [`Endpoint`] without a network. The paired
//! [`MemoryRemote`] plays the other side: it raises status events, delivers
//! payloads and records what the endpoint published and tore down. It is used
//! by the test suites and for loopback wiring inside one process.

use std::sync::Arc;

use parking_lot::Mutex;

use querybus_proto::{decode_message, encode_message, BusMessage};

use crate::endpoint::{Direction, Endpoint, Inbox, PeerHandle, Router};
use crate::error::Error;
use crate::status::{status_channel, StatusEvent, StatusFeed, StatusSender};

#[derive(Debug, Default)]
struct MemoryState {
    next_peer_id: u64,
    listening: Option<(String, u16)>,
    dialed: Vec<(String, u16, PeerHandle)>,
    unpeered: Vec<PeerHandle>,
    published: Vec<(String, BusMessage)>,
}

impl MemoryState {
    fn allocate(&mut self, direction: Direction) -> PeerHandle {
        self.next_peer_id += 1;
        PeerHandle::new(self.next_peer_id, direction)
    }
}

/// Endpoint backed by in-process channels.
#[derive(Debug)]
pub struct MemoryEndpoint {
    name: String,
    state: Arc<Mutex<MemoryState>>,
    router: Router,
    incoming: StatusFeed,
    outgoing: StatusFeed,
}

/// Controller for the far side of a [`MemoryEndpoint`].
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
    router: Router,
    incoming: StatusSender,
    outgoing: StatusSender,
}

impl MemoryEndpoint {
    /// Create an endpoint and its remote controller.
    pub fn new(name: impl Into<String>) -> (Self, MemoryRemote) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        let router = Router::new();
        let (incoming_tx, incoming) = status_channel();
        let (outgoing_tx, outgoing) = status_channel();

        let endpoint = Self {
            name: name.into(),
            state: state.clone(),
            router: router.clone(),
            incoming,
            outgoing,
        };
        let remote = MemoryRemote {
            state,
            router,
            incoming: incoming_tx,
            outgoing: outgoing_tx,
        };
        (endpoint, remote)
    }
}

impl Endpoint for MemoryEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn listen(&mut self, port: u16, address: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.listening.is_none() {
            tracing::debug!(address, port, "memory endpoint listening");
            state.listening = Some((address.to_string(), port));
        }
        Ok(())
    }

    fn peer(&mut self, address: &str, port: u16) -> Result<PeerHandle, Error> {
        let mut state = self.state.lock();
        let peer = state.allocate(Direction::Outgoing);
        state.dialed.push((address.to_string(), port, peer));
        Ok(peer)
    }

    fn unpeer(&mut self, peer: PeerHandle) {
        self.state.lock().unpeered.push(peer);
    }

    fn incoming_status(&mut self) -> &mut StatusFeed {
        &mut self.incoming
    }

    fn outgoing_status(&mut self) -> &mut StatusFeed {
        &mut self.outgoing
    }

    fn subscribe(&mut self, topic: &str) -> Inbox {
        self.router.subscribe(topic)
    }

    fn publish(&mut self, topic: &str, message: &BusMessage) -> Result<(), Error> {
        // Encode anyway so oversized or unencodable messages fail like on the wire.
        let payload = encode_message(message)?;
        let message = decode_message(&payload)?;
        self.state.lock().published.push((topic.to_string(), message));
        Ok(())
    }
}

impl MemoryRemote {
    /// Accept a new incoming link and report it established.
    pub fn establish_incoming(&self) -> PeerHandle {
        let peer = self.state.lock().allocate(Direction::Incoming);
        self.incoming.established(peer);
        peer
    }

    /// Report the most recently dialed link established.
    pub fn establish_outgoing(&self) -> Option<PeerHandle> {
        let peer = self.last_dialed()?;
        self.outgoing.established(peer);
        Some(peer)
    }

    /// Report the most recently dialed link disconnected.
    pub fn disconnect_outgoing(&self) -> Option<PeerHandle> {
        let peer = self.last_dialed()?;
        self.outgoing.disconnected(peer);
        Some(peer)
    }

    /// Report a link disconnected on the feed matching its direction.
    pub fn disconnect(&self, peer: PeerHandle) {
        match peer.direction() {
            Direction::Incoming => self.incoming.disconnected(peer),
            Direction::Outgoing => self.outgoing.disconnected(peer),
        };
    }

    /// Push a raw event onto the incoming feed.
    pub fn push_incoming(&self, event: StatusEvent) {
        self.incoming.send(event);
    }

    /// Push a raw event onto the outgoing feed.
    pub fn push_outgoing(&self, event: StatusEvent) {
        self.outgoing.send(event);
    }

    /// Deliver a message on `topic`. Returns the number of queues reached.
    pub fn deliver(&self, topic: &str, message: &BusMessage) -> usize {
        match encode_message(message) {
            Ok(payload) => self.router.route(topic, &payload),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode delivery");
                0
            }
        }
    }

    /// Deliver raw payload bytes on `topic`.
    pub fn deliver_raw(&self, topic: &str, payload: &[u8]) -> usize {
        self.router.route(topic, payload)
    }

    /// Messages published by the endpoint so far.
    pub fn published(&self) -> Vec<(String, BusMessage)> {
        self.state.lock().published.clone()
    }

    /// Take and clear the published messages.
    pub fn take_published(&self) -> Vec<(String, BusMessage)> {
        std::mem::take(&mut self.state.lock().published)
    }

    /// Links the endpoint tore down, in order.
    pub fn unpeered(&self) -> Vec<PeerHandle> {
        self.state.lock().unpeered.clone()
    }

    /// Addresses and handles the endpoint dialed, in order.
    pub fn dialed(&self) -> Vec<(String, u16, PeerHandle)> {
        self.state.lock().dialed.clone()
    }

    /// Address the endpoint listens on, if any.
    pub fn listening(&self) -> Option<(String, u16)> {
        self.state.lock().listening.clone()
    }

    fn last_dialed(&self) -> Option<PeerHandle> {
        self.state.lock().dialed.last().map(|(_, _, peer)| *peer)
    }
}
