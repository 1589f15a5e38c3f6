//! nng-backed endpoint.
//!
//! Uses a single PAIR socket per host. Pipe notifications become status
//! events: pipes opened by a dialer are reported on the outgoing feed, pipes
//! accepted by a listener on the incoming feed. A receiver thread decodes
//! topic frames and hands their payloads to the router.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nng::options::Options;
use nng::{Dialer, Message, Pipe, PipeEvent, Protocol, Socket};
use parking_lot::Mutex;

use querybus_proto::framing::MAX_FRAME_SIZE;
use querybus_proto::{decode_topic_frame, encode_message, encode_topic_frame, BusMessage};

use crate::endpoint::{Direction, Endpoint, Inbox, PeerHandle, Router};
use crate::error::Error;
use crate::status::{status_channel, StatusFeed, StatusSender};

/// How long the receiver thread blocks before checking for shutdown.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on a blocked send.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct LinkTable {
    next_id: u64,
    dialers: Vec<(PeerHandle, Dialer)>,
    pipes: Vec<(PeerHandle, Pipe)>,
    /// Handle reserved for a dialer that is still being created.
    dialing: Option<PeerHandle>,
}

impl LinkTable {
    fn allocate(&mut self, direction: Direction) -> PeerHandle {
        self.next_id += 1;
        PeerHandle::new(self.next_id, direction)
    }

    fn handle_for(&mut self, pipe: Pipe) -> PeerHandle {
        let dialed = pipe.dialer().and_then(|dialer| {
            self.dialers
                .iter()
                .find(|(_, d)| *d == dialer)
                .map(|(peer, _)| *peer)
                .or(self.dialing)
        });
        match dialed {
            Some(peer) => peer,
            None => self.allocate(Direction::Incoming),
        }
    }
}

/// Endpoint speaking topic frames over an nng PAIR socket.
pub struct NngEndpoint {
    name: String,
    socket: Socket,
    links: Arc<Mutex<LinkTable>>,
    listening: Vec<String>,
    router: Router,
    incoming: StatusFeed,
    outgoing: StatusFeed,
    stop: Arc<AtomicBool>,
    receiver: Option<thread::JoinHandle<()>>,
}

impl NngEndpoint {
    /// Open the socket and start the receiver thread.
    pub fn open(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();

        let socket = Socket::new(Protocol::Pair0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<nng::options::RecvMaxSize>(MAX_FRAME_SIZE)
            .map_err(|e| Error::Transport(format!("failed to set max message size: {}", e)))?;
        socket
            .set_opt::<nng::options::RecvTimeout>(Some(RECV_POLL_INTERVAL))
            .map_err(|e| Error::Transport(format!("failed to set receive timeout: {}", e)))?;
        socket
            .set_opt::<nng::options::SendTimeout>(Some(SEND_TIMEOUT))
            .map_err(|e| Error::Transport(format!("failed to set send timeout: {}", e)))?;

        let links = Arc::new(Mutex::new(LinkTable::default()));
        let (incoming_tx, incoming) = status_channel();
        let (outgoing_tx, outgoing) = status_channel();

        let notify_links = links.clone();
        socket
            .pipe_notify(move |pipe, event| {
                on_pipe_event(&notify_links, &incoming_tx, &outgoing_tx, pipe, event)
            })
            .map_err(|e| Error::Transport(format!("failed to register pipe callback: {}", e)))?;

        let router = Router::new();
        let stop = Arc::new(AtomicBool::new(false));
        let receiver = spawn_receiver(socket.clone(), router.clone(), stop.clone())?;

        tracing::debug!(name = %name, "nng endpoint opened");

        Ok(Self {
            name,
            socket,
            links,
            listening: Vec::new(),
            router,
            incoming,
            outgoing,
            stop,
            receiver: Some(receiver),
        })
    }
}

fn on_pipe_event(
    links: &Mutex<LinkTable>,
    incoming: &StatusSender,
    outgoing: &StatusSender,
    pipe: Pipe,
    event: PipeEvent,
) {
    match event {
        PipeEvent::AddPost => {
            let peer = {
                let mut links = links.lock();
                let peer = links.handle_for(pipe);
                links.pipes.push((peer, pipe));
                peer
            };
            tracing::debug!(peer = peer.id(), direction = ?peer.direction(), "link established");
            feed_for(peer, incoming, outgoing).established(peer);
        }
        PipeEvent::RemovePost => {
            let removed = {
                let mut links = links.lock();
                let position = links.pipes.iter().position(|(_, p)| *p == pipe);
                position.map(|i| links.pipes.remove(i).0)
            };
            // Pipes torn down by `unpeer` are already gone from the table.
            if let Some(peer) = removed {
                tracing::debug!(peer = peer.id(), direction = ?peer.direction(), "link lost");
                feed_for(peer, incoming, outgoing).disconnected(peer);
            }
        }
        _ => {}
    }
}

fn feed_for<'a>(
    peer: PeerHandle,
    incoming: &'a StatusSender,
    outgoing: &'a StatusSender,
) -> &'a StatusSender {
    match peer.direction() {
        Direction::Incoming => incoming,
        Direction::Outgoing => outgoing,
    }
}

fn spawn_receiver(
    socket: Socket,
    router: Router,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, Error> {
    thread::Builder::new()
        .name("querybus-nng-recv".to_string())
        .spawn(move || loop {
            if stop.load(Ordering::SeqCst) {
                tracing::debug!("receiver stopping");
                return;
            }

            match socket.recv() {
                Ok(msg) => match decode_topic_frame(msg.as_slice()) {
                    Ok(frame) => {
                        router.route(frame.topic, frame.payload);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, bytes = msg.len(), "dropping malformed frame");
                    }
                },
                Err(nng::Error::TimedOut) => continue,
                Err(nng::Error::Closed) => return,
                Err(e) => {
                    tracing::error!(error = %e, "receive error");
                }
            }
        })
        .map_err(|e| Error::Transport(format!("failed to spawn receiver: {}", e)))
}

impl Endpoint for NngEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn listen(&mut self, port: u16, address: &str) -> Result<(), Error> {
        let url = format!("tcp://{}:{}", address, port);
        if self.listening.contains(&url) {
            return Ok(());
        }

        self.socket
            .listen(&url)
            .map_err(|e| Error::Transport(format!("failed to listen on {}: {}", url, e)))?;

        tracing::info!(address = %url, "listening on TCP");
        self.listening.push(url);
        Ok(())
    }

    fn peer(&mut self, address: &str, port: u16) -> Result<PeerHandle, Error> {
        let url = format!("tcp://{}:{}", address, port);

        let peer = {
            let mut links = self.links.lock();
            let peer = links.allocate(Direction::Outgoing);
            links.dialing = Some(peer);
            peer
        };

        let dialed = Dialer::new(&self.socket, &url, true);

        let mut links = self.links.lock();
        links.dialing = None;
        let dialer =
            dialed.map_err(|e| Error::Transport(format!("failed to dial {}: {}", url, e)))?;
        links.dialers.push((peer, dialer));

        tracing::debug!(address = %url, peer = peer.id(), "dialing");
        Ok(peer)
    }

    fn unpeer(&mut self, peer: PeerHandle) {
        let (dialers, pipes) = {
            let mut links = self.links.lock();
            let dialers: Vec<Dialer> = links
                .dialers
                .iter()
                .filter(|(p, _)| *p == peer)
                .map(|(_, d)| *d)
                .collect();
            links.dialers.retain(|(p, _)| *p != peer);

            let pipes: Vec<Pipe> = links
                .pipes
                .iter()
                .filter(|(p, _)| *p == peer)
                .map(|(_, pipe)| *pipe)
                .collect();
            links.pipes.retain(|(p, _)| *p != peer);
            (dialers, pipes)
        };

        // Closing fires pipe callbacks, which take the link lock.
        for dialer in dialers {
            dialer.close();
        }
        for pipe in pipes {
            pipe.close();
        }

        tracing::debug!(peer = peer.id(), direction = ?peer.direction(), "link torn down");
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
        let payload = encode_message(message)?;
        let frame = encode_topic_frame(topic, &payload)?;

        self.socket
            .send(Message::from(frame.as_slice()))
            .map_err(|(_, e)| Error::Transport(format!("failed to send on {}: {}", topic, e)))
    }
}

impl fmt::Debug for NngEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NngEndpoint")
            .field("name", &self.name)
            .field("listening", &self.listening)
            .finish_non_exhaustive()
    }
}

impl Drop for NngEndpoint {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.socket.close();
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}
