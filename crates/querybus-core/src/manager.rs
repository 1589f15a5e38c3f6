//! Broker connection lifecycle.
//!
//! [`ConnectionManager`] owns the endpoint, the queue bound to the host's base
//! topic, the queue's readiness descriptor and the per-topic query session.
//! It brings a peer link up (by listening or by dialing a master), negotiates
//! the session topic, drives the query pipeline and watches the link for
//! disconnects.

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::Cancellation;
use crate::config::ConnectionConfig;
use crate::endpoint::{Direction, Endpoint, PeerHandle};
use crate::error::Error;
use crate::query::{QueryManager, NO_QUERY_WARNING};
use crate::queue::{MessageQueue, ReadinessDescriptor};
use crate::source::QuerySource;
use crate::status::{StatusEvent, StatusTag};
use crate::transport::NngEndpoint;

/// Connection state machine for one host.
pub struct ConnectionManager<E: Endpoint> {
    // Fields drop in declaration order: session, endpoint, descriptor, queue.
    query_manager: QueryManager,
    endpoint: E,
    descriptor: ReadinessDescriptor,
    queue: MessageQueue,
    peer: Option<PeerHandle>,
    connected: bool,
    config: ConnectionConfig,
    source: Arc<dyn QuerySource>,
}

impl ConnectionManager<NngEndpoint> {
    /// Open an nng endpoint named after the host and build a manager on it.
    pub fn open(config: ConnectionConfig, source: Arc<dyn QuerySource>) -> Result<Self, Error> {
        let endpoint = NngEndpoint::open(config.host_name.clone())?;
        Self::new(config, endpoint, source)
    }
}

impl<E: Endpoint> ConnectionManager<E> {
    /// Bind a queue to the host's base topic and start an idle session on it.
    pub fn new(
        config: ConnectionConfig,
        mut endpoint: E,
        source: Arc<dyn QuerySource>,
    ) -> Result<Self, Error> {
        let topic = config.base_topic();
        let mut queue = MessageQueue::bind(topic.clone(), &mut endpoint);
        let descriptor = queue.descriptor();
        let query_manager =
            QueryManager::new(config.host_name.clone(), topic.clone(), source.clone());

        tracing::info!(
            host = %config.host_name,
            endpoint = endpoint.name(),
            topic = %topic,
            port = config.port,
            "connection manager created"
        );

        Ok(Self {
            query_manager,
            endpoint,
            descriptor,
            queue,
            peer: None,
            connected: false,
            config,
            source,
        })
    }

    /// Wait for a peer to connect to us.
    ///
    /// A link that drops in the batch it came up in is skipped. Returns
    /// `Ok(false)` if the endpoint stops reporting status.
    pub async fn listen_for_broker_connection(&mut self) -> Result<bool, Error> {
        self.close_broker_connection();
        self.endpoint
            .listen(self.config.port, &self.config.listen_address)?;

        loop {
            let batch = self.endpoint.incoming_status().need_pop().await;
            if batch.is_empty() {
                tracing::warn!("incoming status feed closed");
                return Ok(false);
            }

            if let Some(peer) = settle_batch(&batch, |_| true) {
                self.peer = Some(peer);
                self.connected = true;
                tracing::info!(peer = peer.id(), "broker connected");
                return Ok(true);
            }

            tracing::debug!(events = batch.len(), "status batch without a live link");
        }
    }

    /// Dial a master and poll until the link is up or `cancel` fires.
    ///
    /// The outgoing feed is drained before cancellation is checked, so an
    /// established link is never reported as a failure. A link that drops in
    /// the batch it came up in does not count; the dialer keeps retrying.
    pub async fn connect_to_master(
        &mut self,
        address: &str,
        retry_interval: Duration,
        cancel: &dyn Cancellation,
    ) -> Result<bool, Error> {
        self.close_broker_connection();

        let pending = self.endpoint.peer(address, self.config.port)?;
        tracing::info!(address, port = self.config.port, "connecting to master");

        loop {
            let events = self.endpoint.outgoing_status().want_pop();
            if settle_batch(&events, |peer| peer == pending).is_some() {
                self.peer = Some(pending);
                self.connected = true;
                tracing::info!(address, peer = pending.id(), "connected to master");
                return Ok(true);
            }

            if cancel.is_cancelled() {
                self.endpoint.unpeer(pending);
                tracing::info!(address, "connect cancelled");
                return Ok(false);
            }

            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Read the session topic from the queue and rebind the session to it.
    ///
    /// Returns whether the link is still alive after the rebind, or
    /// [`Error::TopicNegotiation`] if no topic was assigned.
    pub fn get_and_set_topic(&mut self) -> Result<bool, Error> {
        let topic = self
            .query_manager
            .broker_topic(&mut self.queue, &self.descriptor, self.connected);
        if topic.is_empty() {
            tracing::warn!(topic = self.query_manager.topic(), "no topic assigned");
            return Err(Error::TopicNegotiation);
        }

        self.descriptor = self.queue.descriptor();
        self.query_manager = QueryManager::new(
            self.config.host_name.clone(),
            topic.clone(),
            self.source.clone(),
        );
        tracing::info!(topic = %topic, "session topic assigned");

        self.query_manager.send_ready(&mut self.endpoint);
        Ok(self.is_connection_alive())
    }

    /// Read, parse and materialize the queued subscriptions.
    ///
    /// A session without usable query text is torn down and reported as
    /// [`Error::SessionLost`]. Rejected directives and failed
    /// materialization are reported to the peer and leave the link up.
    pub fn get_and_process_query(&mut self) -> Result<(), Error> {
        if let Err(e) = self.query_manager.queries_from_broker_message(
            &mut self.queue,
            &self.descriptor,
            self.connected,
        ) {
            tracing::warn!(error = %e, "no usable query");
            self.query_manager
                .send_warning(&mut self.endpoint, NO_QUERY_WARNING);
            self.close_broker_connection();
            return Err(Error::SessionLost(e));
        }

        if let Err(e) = self.query_manager.query_column_extractor() {
            tracing::debug!(error = %e, "column extraction failed");
        }

        if let Err(e) = self.query_manager.events_from_broker_message() {
            self.query_manager
                .send_error(&mut self.endpoint, &e.to_string());
            return Err(Error::Directive(e));
        }

        match self
            .query_manager
            .query_data_result_vector_init(&mut self.endpoint)
        {
            Ok(registered) => {
                tracing::info!(
                    registered,
                    tracked = self.query_manager.results().len(),
                    "queries processed"
                );
                Ok(())
            }
            Err(e) => {
                self.query_manager
                    .send_error(&mut self.endpoint, &e.to_string());
                Err(Error::Materialize(e))
            }
        }
    }

    /// One tracking pass, then apply queued subscription changes.
    ///
    /// Returns the number of subscription changes applied.
    pub fn track_response_changes(&mut self, cancel: &dyn Cancellation) -> Result<usize, Error> {
        if self.peer.is_none() {
            return Err(Error::NotConnected);
        }

        let sent = self
            .query_manager
            .queries_update_tracking(&mut self.endpoint, cancel);
        tracing::trace!(events = sent, "tracking pass complete");

        self.query_manager.later_subscription_events(
            &mut self.endpoint,
            &mut self.queue,
            &self.descriptor,
            self.peer,
            cancel,
        )
    }

    /// Drain pending status events and report whether the link is up.
    ///
    /// Every queued event is consumed. A disconnect for the current link
    /// closes it; disconnects for links already torn down are ignored.
    pub fn is_connection_alive(&mut self) -> bool {
        let mut events = self.endpoint.outgoing_status().want_pop();
        if matches!(self.peer, Some(p) if p.direction() == Direction::Incoming) {
            events.extend(self.endpoint.incoming_status().want_pop());
        }

        for event in events {
            if event.is_established() {
                continue;
            }
            if self.peer.map_or(true, |p| p == event.peer) {
                tracing::info!(peer = event.peer.id(), "broker disconnected");
                self.close_broker_connection();
            } else {
                tracing::debug!(peer = event.peer.id(), "ignoring disconnect for stale link");
            }
        }

        self.connected
    }

    /// Tear down the current link, if any.
    pub fn close_broker_connection(&mut self) {
        if let Some(peer) = self.peer.take() {
            self.endpoint.unpeer(peer);
            tracing::info!(peer = peer.id(), "broker connection closed");
        }
        self.connected = false;
    }

    /// Whether messages are waiting on the bound queue.
    pub fn has_pending_messages(&mut self) -> Result<bool, Error> {
        self.queue.poll(&self.descriptor)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Current peer link.
    pub fn peer(&self) -> Option<PeerHandle> {
        self.peer
    }

    /// Active session topic.
    pub fn topic(&self) -> &str {
        self.query_manager.topic()
    }

    /// Topic the queue is bound to.
    pub fn base_topic(&self) -> &str {
        self.queue.topic()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn query_manager(&self) -> &QueryManager {
        &self.query_manager
    }

    pub fn query_manager_mut(&mut self) -> &mut QueryManager {
        &mut self.query_manager
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }
}

/// Link left standing after a status batch.
///
/// Events apply in order: the first accepted "established" records its peer
/// and a later "disconnected" for that peer clears it again. Tags for other
/// links change nothing.
fn settle_batch(
    events: &[StatusEvent],
    accept: impl Fn(PeerHandle) -> bool,
) -> Option<PeerHandle> {
    let mut link = None;
    for event in events {
        match event.tag {
            StatusTag::Established if link.is_none() && accept(event.peer) => {
                link = Some(event.peer);
            }
            StatusTag::Disconnected if link == Some(event.peer) => {
                tracing::debug!(peer = event.peer.id(), "link dropped in the batch it came up in");
                link = None;
            }
            _ => {}
        }
    }
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{NeverCancel, ShutdownSignal};
    use crate::error::QueryError;
    use crate::memory::{MemoryEndpoint, MemoryRemote};
    use crate::source::MemoryTableSource;
    use querybus_proto::BusMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RETRY: Duration = Duration::from_millis(100);

    fn manager() -> (ConnectionManager<MemoryEndpoint>, MemoryRemote) {
        let (endpoint, remote) = MemoryEndpoint::new("sensor1");
        let config = ConnectionConfig::new("sensor1", "bus");
        let manager =
            ConnectionManager::new(config, endpoint, Arc::new(MemoryTableSource::new())).unwrap();
        (manager, remote)
    }

    async fn listening_manager() -> (ConnectionManager<MemoryEndpoint>, MemoryRemote, PeerHandle) {
        let (mut manager, remote) = manager();
        let peer = remote.establish_incoming();
        assert!(manager.listen_for_broker_connection().await.unwrap());
        (manager, remote, peer)
    }

    #[test]
    fn test_initial_state() {
        let (manager, _remote) = manager();
        assert_eq!(manager.topic(), "bus/host/sensor1");
        assert_eq!(manager.base_topic(), "bus/host/sensor1");
        assert!(!manager.is_connected());
        assert!(manager.peer().is_none());
    }

    #[tokio::test]
    async fn test_listen_finds_established_in_batch() {
        let (mut manager, remote) = manager();
        let stale = PeerHandle::new(50, Direction::Incoming);
        remote.push_incoming(StatusEvent::disconnected(stale));
        let peer = remote.establish_incoming();
        remote.push_incoming(StatusEvent::disconnected(stale));

        assert!(manager.listen_for_broker_connection().await.unwrap());
        assert!(manager.is_connected());
        assert_eq!(manager.peer(), Some(peer));
        assert_eq!(remote.listening(), Some(("0.0.0.0".to_string(), 9999)));
    }

    #[tokio::test]
    async fn test_listen_waits_across_batches() {
        let (mut manager, remote) = manager();
        remote.push_incoming(StatusEvent::disconnected(PeerHandle::new(9, Direction::Incoming)));

        let producer = remote.clone();
        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.establish_incoming()
        });

        assert!(manager.listen_for_broker_connection().await.unwrap());
        let peer = task.await.unwrap();
        assert_eq!(manager.peer(), Some(peer));
    }

    #[tokio::test]
    async fn test_listen_feed_closed() {
        let (mut manager, remote) = manager();
        drop(remote);
        assert!(!manager.listen_for_broker_connection().await.unwrap());
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_listen_skips_link_dropped_in_same_batch() {
        let (mut manager, remote) = manager();
        let dropped = remote.establish_incoming();
        remote.disconnect(dropped);

        let producer = remote.clone();
        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.establish_incoming()
        });

        assert!(manager.listen_for_broker_connection().await.unwrap());
        let peer = task.await.unwrap();
        assert_eq!(manager.peer(), Some(peer));
        assert!(manager.is_connection_alive());
    }

    #[tokio::test]
    async fn test_listen_takes_next_link_in_batch() {
        let (mut manager, remote) = manager();
        let dropped = remote.establish_incoming();
        remote.disconnect(dropped);
        let peer = remote.establish_incoming();
        remote.push_incoming(StatusEvent::disconnected(PeerHandle::new(60, Direction::Incoming)));

        assert!(manager.listen_for_broker_connection().await.unwrap());
        assert_eq!(manager.peer(), Some(peer));
        assert!(manager.is_connection_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_polls_until_established() {
        let (mut manager, remote) = manager();

        let dialer = remote.clone();
        let task = tokio::spawn(async move {
            loop {
                if let Some(peer) = dialer.establish_outgoing() {
                    return peer;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let connected = manager
            .connect_to_master("10.0.0.1", RETRY, &NeverCancel)
            .await
            .unwrap();
        assert!(connected);

        let peer = task.await.unwrap();
        assert_eq!(manager.peer(), Some(peer));
        assert_eq!(remote.dialed()[0].0, "10.0.0.1");
        assert_eq!(remote.dialed()[0].1, 9999);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_between_polls() {
        let (mut manager, remote) = manager();

        let dialer = remote.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            dialer.establish_outgoing()
        });

        let start = tokio::time::Instant::now();
        assert!(manager
            .connect_to_master("10.0.0.1", RETRY, &NeverCancel)
            .await
            .unwrap());
        let elapsed = start.elapsed();

        // Polls at 0, 100, 200, 300 miss; the one at 400 sees the link.
        assert!(elapsed >= RETRY * 4, "elapsed {:?}", elapsed);
        assert!(elapsed < RETRY * 5, "elapsed {:?}", elapsed);
        assert_eq!(manager.peer(), task.await.unwrap());
    }

    /// Fires on its `limit`th check.
    struct CancelAfter {
        checks: AtomicUsize,
        limit: usize,
    }

    impl Cancellation for CancelAfter {
        fn is_cancelled(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_sleeps_before_each_retry() {
        let (mut manager, _remote) = manager();
        let cancel = CancelAfter {
            checks: AtomicUsize::new(0),
            limit: 5,
        };

        let start = tokio::time::Instant::now();
        assert!(!manager
            .connect_to_master("10.0.0.1", RETRY, &cancel)
            .await
            .unwrap());

        assert_eq!(cancel.checks.load(Ordering::SeqCst), 5);
        assert!(start.elapsed() >= RETRY * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_skips_link_dropped_in_same_batch() {
        let (mut manager, remote) = manager();
        let expected = PeerHandle::new(1, Direction::Outgoing);
        remote.push_outgoing(StatusEvent::established(expected));
        remote.push_outgoing(StatusEvent::disconnected(expected));

        let cancel = ShutdownSignal::new();
        cancel.trigger();
        assert!(!manager
            .connect_to_master("10.0.0.1", RETRY, &cancel)
            .await
            .unwrap());
        assert!(!manager.is_connected());
        assert_eq!(remote.unpeered(), vec![expected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_after_link_dropped_in_same_batch() {
        let (mut manager, remote) = manager();
        let expected = PeerHandle::new(1, Direction::Outgoing);
        remote.push_outgoing(StatusEvent::established(expected));
        remote.push_outgoing(StatusEvent::disconnected(expected));
        remote.push_outgoing(StatusEvent::disconnected(PeerHandle::new(70, Direction::Outgoing)));

        let dialer = remote.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            dialer.establish_outgoing()
        });

        assert!(manager
            .connect_to_master("10.0.0.1", RETRY, &NeverCancel)
            .await
            .unwrap());
        assert_eq!(manager.peer(), Some(expected));
        assert!(manager.is_connection_alive());
        assert!(remote.unpeered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cancelled_before_established() {
        let (mut manager, remote) = manager();
        let cancel = ShutdownSignal::new();
        cancel.trigger();

        let connected = manager
            .connect_to_master("10.0.0.1", RETRY, &cancel)
            .await
            .unwrap();
        assert!(!connected);
        assert!(!manager.is_connected());

        let dialed = remote.dialed()[0].2;
        assert_eq!(remote.unpeered(), vec![dialed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_prefers_pending_established_over_cancel() {
        let (mut manager, remote) = manager();
        // First handle a fresh memory endpoint hands out.
        let expected = PeerHandle::new(1, Direction::Outgoing);
        remote.push_outgoing(StatusEvent::established(expected));

        let cancel = ShutdownSignal::new();
        cancel.trigger();

        assert!(manager
            .connect_to_master("10.0.0.1", RETRY, &cancel)
            .await
            .unwrap());
        assert_eq!(manager.peer(), Some(expected));
        assert!(remote.unpeered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_ignores_other_links() {
        let (mut manager, remote) = manager();
        remote.push_outgoing(StatusEvent::established(PeerHandle::new(77, Direction::Outgoing)));

        let cancel = ShutdownSignal::new();
        cancel.trigger();
        assert!(!manager
            .connect_to_master("10.0.0.1", RETRY, &cancel)
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_tears_down_previous_link() {
        let (mut manager, remote, first) = listening_manager().await;
        let cancel = ShutdownSignal::new();
        cancel.trigger();

        manager
            .connect_to_master("10.0.0.1", RETRY, &cancel)
            .await
            .unwrap();
        assert_eq!(remote.unpeered()[0], first);
    }

    #[tokio::test]
    async fn test_outgoing_disconnect_closes_link() {
        let (mut manager, remote) = manager();
        let expected = PeerHandle::new(1, Direction::Outgoing);
        remote.push_outgoing(StatusEvent::established(expected));
        assert!(manager
            .connect_to_master("10.0.0.1", RETRY, &NeverCancel)
            .await
            .unwrap());

        assert!(manager.is_connection_alive());

        remote.disconnect_outgoing();
        assert!(!manager.is_connection_alive());
        assert!(manager.peer().is_none());
        assert_eq!(remote.unpeered(), vec![expected]);

        assert!(!manager.is_connection_alive());
        assert_eq!(remote.unpeered().len(), 1);
    }

    #[tokio::test]
    async fn test_incoming_disconnect_closes_link() {
        let (mut manager, remote, peer) = listening_manager().await;
        remote.disconnect(peer);
        assert!(!manager.is_connection_alive());
        assert_eq!(remote.unpeered(), vec![peer]);
    }

    #[tokio::test]
    async fn test_stale_disconnect_ignored() {
        let (mut manager, remote, peer) = listening_manager().await;
        remote.push_outgoing(StatusEvent::disconnected(PeerHandle::new(40, Direction::Outgoing)));
        remote.push_incoming(StatusEvent::disconnected(PeerHandle::new(41, Direction::Incoming)));

        assert!(manager.is_connection_alive());
        assert_eq!(manager.peer(), Some(peer));
    }

    #[tokio::test]
    async fn test_liveness_drains_whole_batch() {
        let (mut manager, remote, peer) = listening_manager().await;
        remote.disconnect(peer);
        remote.establish_incoming();

        assert!(!manager.is_connection_alive());
        assert!(manager.endpoint_mut().incoming_status().want_pop().is_empty());
    }

    #[tokio::test]
    async fn test_topic_negotiation() {
        let (mut manager, remote, _peer) = listening_manager().await;

        assert!(matches!(manager.get_and_set_topic(), Err(Error::TopicNegotiation)));
        assert_eq!(manager.topic(), "bus/host/sensor1");

        remote.deliver(
            "bus/host/sensor1",
            &BusMessage::topic_assignment("bus/host/sensor1/42"),
        );
        assert!(manager.get_and_set_topic().unwrap());
        assert_eq!(manager.topic(), "bus/host/sensor1/42");
        assert_eq!(manager.base_topic(), "bus/host/sensor1");

        let published = remote.take_published();
        assert_eq!(
            published,
            vec![(
                "bus/host/sensor1/42".to_string(),
                BusMessage::Ready {
                    host: "sensor1".into()
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_topic_rebind_reports_lost_link() {
        let (mut manager, remote, peer) = listening_manager().await;
        remote.deliver("bus/host/sensor1", &BusMessage::topic_assignment("bus/host/sensor1/7"));
        remote.disconnect(peer);

        assert!(!manager.get_and_set_topic().unwrap());
        assert_eq!(manager.topic(), "bus/host/sensor1/7");
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_topic_requires_connection() {
        let (mut manager, remote) = manager();
        remote.deliver("bus/host/sensor1", &BusMessage::topic_assignment("bus/host/sensor1/1"));
        assert!(matches!(manager.get_and_set_topic(), Err(Error::TopicNegotiation)));
    }

    #[tokio::test]
    async fn test_malformed_query_loses_session() {
        let (mut manager, remote, peer) = listening_manager().await;
        remote.deliver_raw("bus/host/sensor1", b"not a message");

        let err = manager.get_and_process_query().unwrap_err();
        assert!(matches!(
            err,
            Error::SessionLost(QueryError::MalformedPayload(_))
        ));
        assert!(err.is_session_fatal());
        assert!(!manager.is_connected());
        assert_eq!(remote.unpeered(), vec![peer]);
        assert!(remote.published().iter().any(|(_, m)| matches!(
            m,
            BusMessage::Warning { message, .. } if message == NO_QUERY_WARNING
        )));
    }

    #[tokio::test]
    async fn test_empty_query_loses_session() {
        let (mut manager, _remote, _peer) = listening_manager().await;
        assert!(matches!(
            manager.get_and_process_query(),
            Err(Error::SessionLost(QueryError::NoQueries))
        ));
    }

    #[tokio::test]
    async fn test_bad_directive_keeps_link() {
        let (mut manager, remote, peer) = listening_manager().await;
        remote.deliver(
            "bus/host/sensor1",
            &BusMessage::subscribe("SELECT pid FROM processes", "SOMETIMES"),
        );

        let err = manager.get_and_process_query().unwrap_err();
        assert!(matches!(err, Error::Directive(QueryError::Directive { .. })));
        assert!(!err.is_session_fatal());
        assert!(manager.is_connected());
        assert_eq!(manager.peer(), Some(peer));
        assert!(remote
            .published()
            .iter()
            .any(|(_, m)| matches!(m, BusMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_tracking_requires_peer() {
        let (mut manager, _remote) = manager();
        assert!(matches!(
            manager.track_response_changes(&NeverCancel),
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_pending_messages() {
        let (mut manager, remote, _peer) = listening_manager().await;
        assert!(!manager.has_pending_messages().unwrap());

        remote.deliver("bus/host/sensor1", &BusMessage::topic_assignment("bus/host/sensor1/9"));
        assert!(manager.has_pending_messages().unwrap());
        assert!(manager.get_and_set_topic().unwrap());
        assert!(!manager.has_pending_messages().unwrap());
    }

    #[tokio::test]
    async fn test_stale_descriptor_after_rebind() {
        let (mut manager, remote, _peer) = listening_manager().await;
        let old = manager.queue.descriptor();
        remote.deliver("bus/host/sensor1", &BusMessage::topic_assignment("bus/host/sensor1/3"));
        // The manager's own descriptor was invalidated by the one minted above.
        assert!(matches!(manager.get_and_set_topic(), Err(Error::TopicNegotiation)));
        assert!(manager.queue.poll(&old).unwrap());
    }
}
