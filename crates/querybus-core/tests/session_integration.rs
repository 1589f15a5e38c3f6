//! Integration tests for a full broker session over the in-memory endpoint.

use std::sync::Arc;
use std::time::Duration;

use querybus_core::proto::{BusMessage, ChangeKind, QueryEvent, QuerySubscription};
use querybus_core::{
    ConnectionConfig, ConnectionManager, Error, MemoryEndpoint, MemoryRemote, MemoryTableSource,
    NeverCancel, QueryError, ShutdownSignal, Table,
};

const BASE_TOPIC: &str = "bus/host/sensor1";
const SESSION_TOPIC: &str = "bus/host/sensor1/42";

struct Session {
    manager: ConnectionManager<MemoryEndpoint>,
    remote: MemoryRemote,
    source: Arc<MemoryTableSource>,
}

impl Session {
    fn new() -> Self {
        let source = Arc::new(MemoryTableSource::new().with_table(
            "processes",
            Table::new(["pid", "name", "uid"])
                .with_row(["1", "init", "0"])
                .with_row(["42", "sshd", "0"])
                .with_row(["1000", "bash", "1000"]),
        ));
        let (endpoint, remote) = MemoryEndpoint::new("sensor1");
        let config = ConnectionConfig::new("sensor1", "bus").with_port(9999);
        let manager = ConnectionManager::new(config, endpoint, source.clone()).unwrap();

        Self {
            manager,
            remote,
            source,
        }
    }

    async fn negotiated() -> Self {
        let mut session = Self::new();
        session.remote.establish_incoming();
        assert!(session.manager.listen_for_broker_connection().await.unwrap());
        session
            .remote
            .deliver(BASE_TOPIC, &BusMessage::topic_assignment(SESSION_TOPIC));
        assert!(session.manager.get_and_set_topic().unwrap());
        session.remote.take_published();
        session
    }

    fn subscribe(&self, subscription: QuerySubscription) {
        self.remote
            .deliver(SESSION_TOPIC, &BusMessage::Subscribe(subscription));
    }

    fn events(&self) -> Vec<QueryEvent> {
        self.remote
            .take_published()
            .into_iter()
            .filter_map(|(topic, message)| {
                assert_eq!(topic, SESSION_TOPIC);
                match message {
                    BusMessage::Event(event) => Some(event),
                    _ => None,
                }
            })
            .collect()
    }
}

#[tokio::test]
async fn test_end_to_end_malformed_query() {
    let mut session = Session::new();
    assert_eq!(session.manager.topic(), "bus/host/sensor1");

    let peer = session.remote.establish_incoming();
    assert!(session.manager.listen_for_broker_connection().await.unwrap());
    assert!(session.manager.is_connected());

    session
        .remote
        .deliver(BASE_TOPIC, &BusMessage::topic_assignment(SESSION_TOPIC));
    assert!(session.manager.get_and_set_topic().unwrap());
    assert_eq!(session.manager.topic(), SESSION_TOPIC);

    session.remote.deliver_raw(SESSION_TOPIC, &[0xde, 0xad]);
    assert!(session.manager.get_and_process_query().is_err());
    assert!(!session.manager.is_connected());
    assert_eq!(session.remote.unpeered(), vec![peer]);
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let mut session = Session::negotiated().await;

    session.subscribe(
        QuerySubscription::new("SELECT pid, name FROM processes WHERE uid = 0", "BOTH")
            .with_initial_dump(),
    );
    session.manager.get_and_process_query().unwrap();

    let initial = session.events();
    assert_eq!(initial.len(), 2);
    assert!(initial.iter().all(|e| e.kind == ChangeKind::Added));
    assert_eq!(initial[0].columns, vec!["pid".to_string(), "name".to_string()]);

    session.source.update_table("processes", |t| {
        t.retain_rows(|row| row[0] != "42");
        t.push_row(["7", "cron", "0"]);
        t.push_row(["8", "vim", "1000"]);
    });

    assert_eq!(session.manager.track_response_changes(&NeverCancel).unwrap(), 0);
    let changes = session.events();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].kind, ChangeKind::Removed);
    assert_eq!(changes[0].values, vec!["42".to_string(), "sshd".to_string()]);
    assert_eq!(changes[1].kind, ChangeKind::Added);
    assert_eq!(changes[1].values, vec!["7".to_string(), "cron".to_string()]);

    assert_eq!(session.manager.track_response_changes(&NeverCancel).unwrap(), 0);
    assert!(session.events().is_empty());
}

#[tokio::test]
async fn test_later_subscriptions_while_tracking() {
    let mut session = Session::negotiated().await;
    session.subscribe(QuerySubscription::new("SELECT pid FROM processes", "ADD"));
    session.manager.get_and_process_query().unwrap();

    session.subscribe(QuerySubscription::new("SELECT name FROM processes", "REMOVED"));
    assert_eq!(session.manager.track_response_changes(&NeverCancel).unwrap(), 1);
    assert_eq!(session.manager.query_manager().results().len(), 2);

    session.source.update_table("processes", |t| t.retain_rows(|row| row[1] != "bash"));
    session.manager.track_response_changes(&NeverCancel).unwrap();
    let events = session.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].query, "SELECT name FROM processes");
    assert_eq!(events[0].kind, ChangeKind::Removed);

    session
        .remote
        .deliver(SESSION_TOPIC, &BusMessage::unsubscribe("SELECT name FROM processes"));
    assert_eq!(session.manager.track_response_changes(&NeverCancel).unwrap(), 1);
    assert_eq!(session.manager.query_manager().results().len(), 1);
}

#[tokio::test]
async fn test_directive_error_then_retry() {
    let mut session = Session::negotiated().await;
    session.subscribe(QuerySubscription::new("SELECT * FROM processes", "ADD"));
    session.subscribe(QuerySubscription::new("SELECT pid FROM processes", "ADD"));

    let err = session.manager.get_and_process_query().unwrap_err();
    assert!(matches!(err, Error::Directive(QueryError::Wildcard { .. })));
    assert!(session.manager.is_connected());
    assert!(session.remote.take_published().contains(&(
        SESSION_TOPIC.to_string(),
        BusMessage::Error {
            host: "sensor1".into(),
            message: "* is unexpected, write columns instead".into(),
        }
    )));

    // The valid subscription is still pending and completes on retry.
    assert_eq!(session.manager.query_manager().pending_count(), 1);
    session.manager.get_and_process_query().unwrap();
    assert!(session
        .manager
        .query_manager()
        .results()
        .get("SELECT pid FROM processes")
        .is_some());
}

#[tokio::test]
async fn test_unknown_table_fails_materialization() {
    let mut session = Session::negotiated().await;
    session.subscribe(QuerySubscription::new("SELECT uid FROM users", "BOTH"));

    assert!(matches!(
        session.manager.get_and_process_query(),
        Err(Error::Materialize(QueryError::Source { .. }))
    ));
    assert!(session.manager.is_connected());
}

#[tokio::test]
async fn test_tracking_after_disconnect() {
    let mut session = Session::negotiated().await;
    session.subscribe(QuerySubscription::new("SELECT pid FROM processes", "BOTH"));
    session.manager.get_and_process_query().unwrap();

    let peer = session.manager.peer().unwrap();
    session.remote.disconnect(peer);
    assert!(!session.manager.is_connection_alive());
    assert!(matches!(
        session.manager.track_response_changes(&NeverCancel),
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_cancelled_tracking_sends_nothing() {
    let mut session = Session::negotiated().await;
    session.subscribe(QuerySubscription::new("SELECT pid FROM processes", "ADD"));
    session.manager.get_and_process_query().unwrap();
    session.remote.take_published();

    session
        .source
        .update_table("processes", |t| t.push_row(["5", "x", "0"]));
    let cancel = ShutdownSignal::new();
    cancel.trigger();

    assert_eq!(session.manager.track_response_changes(&cancel).unwrap(), 0);
    assert!(session.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_session_lost() {
    let mut session = Session::negotiated().await;
    session.remote.deliver_raw(SESSION_TOPIC, b"??");
    assert!(session.manager.get_and_process_query().is_err());

    let remote = session.remote.clone();
    let dialer = tokio::spawn(async move {
        loop {
            if let Some(peer) = remote.establish_outgoing() {
                return peer;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    assert!(session
        .manager
        .connect_to_master("192.168.1.10", Duration::from_millis(50), &NeverCancel)
        .await
        .unwrap());
    assert_eq!(session.manager.peer(), Some(dialer.await.unwrap()));
    assert_eq!(session.remote.dialed()[0].1, 9999);
}
