//! Per-topic query session.
//!
//! A [`QueryManager`] reads subscriptions from the bound message queue,
//! parses them, materializes their result sets through a [`QuerySource`] and
//! reports row changes upstream. The queue, descriptor and endpoint belong to
//! the connection manager and are lent to every call; the session only owns
//! query state, so replacing it on a topic switch drops all of that state.

mod tracked;

use std::fmt;
use std::sync::Arc;

use querybus_lang::{parse_select, EventMode, SelectQuery};
use querybus_proto::{decode_message, BusMessage, ChangeKind, QueryEvent, QuerySubscription};

use crate::cancel::Cancellation;
use crate::endpoint::{Endpoint, PeerHandle};
use crate::error::{Error, QueryError};
use crate::queue::{MessageQueue, ReadinessDescriptor};
use crate::source::{QuerySource, Row};
use crate::topic::extends_topic;

pub use tracked::{ResultVector, RowChange, TrackedQuery};

/// Warning sent when a session yields no usable query.
pub const NO_QUERY_WARNING: &str = "No SQL query registered, or query was malformed";

/// A subscription read from the bus, not yet materialized.
#[derive(Debug, Clone)]
struct PendingQuery {
    text: String,
    directive: String,
    initial_dump: bool,
    select: Option<SelectQuery>,
    parse_error: Option<String>,
    mode: Option<EventMode>,
}

impl From<QuerySubscription> for PendingQuery {
    fn from(sub: QuerySubscription) -> Self {
        Self {
            text: sub.query.trim().to_string(),
            directive: sub.event,
            initial_dump: sub.initial_dump,
            select: None,
            parse_error: None,
            mode: None,
        }
    }
}

impl PendingQuery {
    fn validate(&self) -> Result<EventMode, QueryError> {
        if let Some(reason) = &self.parse_error {
            return Err(QueryError::Syntax {
                query: self.text.clone(),
                reason: reason.clone(),
            });
        }
        let Some(select) = &self.select else {
            return Err(QueryError::Syntax {
                query: self.text.clone(),
                reason: "columns were not extracted".to_string(),
            });
        };
        if select.is_wildcard() {
            return Err(QueryError::Wildcard {
                query: self.text.clone(),
            });
        }
        self.directive
            .parse::<EventMode>()
            .map_err(|e| QueryError::Directive {
                query: self.text.clone(),
                reason: e.message,
            })
    }
}

/// Query session bound to one topic.
pub struct QueryManager {
    host: String,
    topic: String,
    source: Arc<dyn QuerySource>,
    pending: Vec<PendingQuery>,
    results: ResultVector,
}

impl QueryManager {
    /// Create a session for `host` on `topic`.
    pub fn new(
        host: impl Into<String>,
        topic: impl Into<String>,
        source: Arc<dyn QuerySource>,
    ) -> Self {
        Self {
            host: host.into(),
            topic: topic.into(),
            source,
            pending: Vec::new(),
            results: ResultVector::new(),
        }
    }

    /// Topic replies are published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Queries being tracked.
    pub fn results(&self) -> &ResultVector {
        &self.results
    }

    /// Subscriptions read but not yet materialized.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Topic carried by the first queued message.
    ///
    /// Returns an empty string when disconnected, when nothing is queued, or
    /// when the first message is not a usable topic assignment. A usable
    /// assignment names the queue's topic or a topic nested under it.
    pub fn broker_topic(
        &mut self,
        queue: &mut MessageQueue,
        descriptor: &ReadinessDescriptor,
        connected: bool,
    ) -> String {
        if !connected {
            return String::new();
        }

        let delivery = match queue.pop(descriptor) {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return String::new(),
            Err(e) => {
                tracing::warn!(error = %e, "cannot poll message queue");
                return String::new();
            }
        };

        match decode_message(&delivery.payload) {
            Ok(BusMessage::TopicAssignment { topic }) if topic.trim().is_empty() => {
                tracing::warn!("blank topic assignment");
                String::new()
            }
            Ok(BusMessage::TopicAssignment { topic }) => {
                if extends_topic(queue.topic(), &topic) {
                    topic
                } else {
                    tracing::warn!(
                        topic = %topic,
                        base = queue.topic(),
                        "assigned topic is not under the host topic"
                    );
                    String::new()
                }
            }
            Ok(other) => {
                tracing::warn!(kind = other.kind(), "expected a topic assignment");
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, topic = %delivery.topic, "malformed topic message");
                String::new()
            }
        }
    }

    /// Read every queued subscription.
    ///
    /// Fails if a payload is malformed, if a subscription carries blank text,
    /// or if no query is left pending afterwards. Returns the number of
    /// subscriptions read.
    pub fn queries_from_broker_message(
        &mut self,
        queue: &mut MessageQueue,
        descriptor: &ReadinessDescriptor,
        connected: bool,
    ) -> Result<usize, QueryError> {
        if !connected {
            return Err(QueryError::Disconnected);
        }

        let deliveries = queue
            .want_pop(descriptor)
            .map_err(|e| QueryError::MalformedPayload(e.to_string()))?;

        let mut added = 0;
        let mut malformed = None;
        for delivery in deliveries {
            match decode_message(&delivery.payload) {
                Ok(BusMessage::Subscribe(sub)) => {
                    if sub.query.trim().is_empty() {
                        malformed.get_or_insert(QueryError::EmptyQuery);
                    } else {
                        self.pending.push(PendingQuery::from(sub));
                        added += 1;
                    }
                }
                Ok(BusMessage::Unsubscribe { query }) => {
                    let query = query.trim();
                    self.pending.retain(|p| p.text != query);
                    self.results.remove(query);
                }
                Ok(other) => {
                    tracing::debug!(kind = other.kind(), "ignoring message while reading queries");
                }
                Err(e) => {
                    malformed.get_or_insert(QueryError::MalformedPayload(e.to_string()));
                }
            }
        }

        if let Some(err) = malformed {
            self.pending.clear();
            return Err(err);
        }
        if self.pending.is_empty() {
            return Err(QueryError::NoQueries);
        }

        tracing::debug!(added, pending = self.pending.len(), "queries read from broker");
        Ok(added)
    }

    /// Parse the column list of every pending query.
    ///
    /// Failures are recorded on the query and surface again when its event
    /// directives are checked.
    pub fn query_column_extractor(&mut self) -> Result<(), QueryError> {
        let mut first_error = None;

        for pending in self.pending.iter_mut() {
            if pending.select.is_some() || pending.parse_error.is_some() {
                continue;
            }
            match parse_select(&pending.text) {
                Ok(select) => pending.select = Some(select),
                Err(e) => {
                    tracing::debug!(query = %pending.text, error = %e, "query did not parse");
                    pending.parse_error = Some(e.message.clone());
                    first_error.get_or_insert(QueryError::Syntax {
                        query: pending.text.clone(),
                        reason: e.message,
                    });
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Check the event directive of every pending query.
    ///
    /// Queries that fail are dropped; the rest stay pending. Returns the first
    /// failure.
    pub fn events_from_broker_message(&mut self) -> Result<(), QueryError> {
        let mut first_error = None;

        self.pending.retain_mut(|pending| match pending.validate() {
            Ok(mode) => {
                pending.mode = Some(mode);
                true
            }
            Err(e) => {
                tracing::warn!(query = %pending.text, error = %e, "subscription rejected");
                first_error.get_or_insert(e);
                false
            }
        });

        first_error.map_or(Ok(()), Err)
    }

    /// Execute every validated query and start tracking it.
    ///
    /// Returns the number of queries registered, or the first execution
    /// failure. Queries that executed are tracked either way.
    pub fn query_data_result_vector_init<E: Endpoint + ?Sized>(
        &mut self,
        endpoint: &mut E,
    ) -> Result<usize, QueryError> {
        let mut first_error = None;
        let mut registered = 0;

        for pending in std::mem::take(&mut self.pending) {
            let (Some(select), Some(mode)) = (pending.select, pending.mode) else {
                first_error.get_or_insert(QueryError::Syntax {
                    query: pending.text,
                    reason: "query was not validated".to_string(),
                });
                continue;
            };

            let rows = match self.source.execute(&select) {
                Ok(rows) => rows,
                Err(error) => {
                    tracing::warn!(query = %pending.text, error = %error, "query execution failed");
                    first_error.get_or_insert(QueryError::Source {
                        query: pending.text,
                        error,
                    });
                    continue;
                }
            };

            let columns = select.column_names().unwrap_or_default();
            let tracked = TrackedQuery::new(pending.text, select, columns, mode, rows);

            if pending.initial_dump && mode.reports_added() {
                for row in tracked.rows() {
                    self.send_event(endpoint, &tracked, ChangeKind::Added, row.clone());
                }
            }

            tracing::info!(
                query = %tracked.text,
                mode = %tracked.mode,
                rows = tracked.row_count(),
                "query registered"
            );
            self.results.insert(tracked);
            registered += 1;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(registered),
        }
    }

    /// Tell the peer the session is bound and accepting queries.
    pub fn send_ready<E: Endpoint + ?Sized>(&self, endpoint: &mut E) {
        self.publish(
            endpoint,
            &BusMessage::Ready {
                host: self.host.clone(),
            },
        );
    }

    pub fn send_warning<E: Endpoint + ?Sized>(&self, endpoint: &mut E, message: &str) {
        self.publish(
            endpoint,
            &BusMessage::Warning {
                host: self.host.clone(),
                message: message.to_string(),
            },
        );
    }

    pub fn send_error<E: Endpoint + ?Sized>(&self, endpoint: &mut E, message: &str) {
        self.publish(
            endpoint,
            &BusMessage::Error {
                host: self.host.clone(),
                message: message.to_string(),
            },
        );
    }

    /// Re-run every tracked query and report row changes.
    ///
    /// `cancel` is checked before each query. Returns the number of events
    /// sent.
    pub fn queries_update_tracking<E: Endpoint + ?Sized>(
        &mut self,
        endpoint: &mut E,
        cancel: &dyn Cancellation,
    ) -> usize {
        let mut events = Vec::new();

        for query in self.results.iter_mut() {
            if cancel.is_cancelled() {
                tracing::debug!("tracking pass cancelled");
                break;
            }

            let rows = match self.source.execute(&query.select) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(query = %query.text, error = %e, "tracking query failed");
                    continue;
                }
            };

            for change in query.apply(rows) {
                events.push(QueryEvent {
                    host: self.host.clone(),
                    query: query.text.clone(),
                    kind: change.kind,
                    columns: query.columns.clone(),
                    values: change.row,
                });
            }
        }

        let sent = events.len();
        for event in events {
            self.publish(endpoint, &BusMessage::Event(event));
        }
        if sent > 0 {
            tracing::debug!(events = sent, "tracked changes sent");
        }
        sent
    }

    /// Apply subscription changes queued since the session started.
    ///
    /// New subscriptions go through parsing and materialization one at a
    /// time; failures are reported upstream and skipped. Returns the number
    /// of subscriptions added or removed.
    pub fn later_subscription_events<E: Endpoint + ?Sized>(
        &mut self,
        endpoint: &mut E,
        queue: &mut MessageQueue,
        descriptor: &ReadinessDescriptor,
        peer: Option<PeerHandle>,
        cancel: &dyn Cancellation,
    ) -> Result<usize, Error> {
        let Some(peer) = peer else {
            return Err(Error::NotConnected);
        };
        if cancel.is_cancelled() {
            return Ok(0);
        }

        let mut changes = 0;
        for delivery in queue.want_pop(descriptor)? {
            match decode_message(&delivery.payload) {
                Ok(BusMessage::Subscribe(sub)) => {
                    if self.register_later(endpoint, sub) {
                        changes += 1;
                    }
                }
                Ok(BusMessage::Unsubscribe { query }) => {
                    let query = query.trim();
                    if self.results.remove(query) {
                        tracing::info!(query = %query, "query unsubscribed");
                        changes += 1;
                    } else {
                        tracing::debug!(query = %query, "unsubscribe for unknown query");
                    }
                }
                Ok(other) => {
                    tracing::debug!(kind = other.kind(), "ignoring message while tracking");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed subscription change");
                    let error = QueryError::MalformedPayload(e.to_string());
                    self.send_warning(endpoint, &error.to_string());
                }
            }
        }

        if changes > 0 {
            tracing::debug!(peer = peer.id(), changes, "subscription changes applied");
        }
        Ok(changes)
    }

    fn register_later<E: Endpoint + ?Sized>(
        &mut self,
        endpoint: &mut E,
        sub: QuerySubscription,
    ) -> bool {
        if sub.query.trim().is_empty() {
            self.send_warning(endpoint, &QueryError::EmptyQuery.to_string());
            return false;
        }

        self.pending.push(PendingQuery::from(sub));
        let _ = self.query_column_extractor();

        if let Err(e) = self.events_from_broker_message() {
            self.send_error(endpoint, &e.to_string());
            return false;
        }

        match self.query_data_result_vector_init(endpoint) {
            Ok(registered) => registered > 0,
            Err(e) => {
                self.send_error(endpoint, &e.to_string());
                false
            }
        }
    }

    fn send_event<E: Endpoint + ?Sized>(
        &self,
        endpoint: &mut E,
        query: &TrackedQuery,
        kind: ChangeKind,
        values: Row,
    ) {
        self.publish(
            endpoint,
            &BusMessage::Event(QueryEvent {
                host: self.host.clone(),
                query: query.text.clone(),
                kind,
                columns: query.columns.clone(),
                values,
            }),
        );
    }

    fn publish<E: Endpoint + ?Sized>(&self, endpoint: &mut E, message: &BusMessage) -> bool {
        match endpoint.publish(&self.topic, message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    topic = %self.topic,
                    kind = message.kind(),
                    "failed to send message"
                );
                false
            }
        }
    }
}

impl fmt::Debug for QueryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryManager")
            .field("host", &self.host)
            .field("topic", &self.topic)
            .field("pending", &self.pending.len())
            .field("tracked", &self.results.len())
            .finish()
    }
}
