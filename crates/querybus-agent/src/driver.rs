//! Agent session loop.
//!
//! Repeats connect, topic negotiation, query processing and tracking until
//! shutdown. A lost session sends the loop back to the connect stage.

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use querybus_core::{Cancellation, ConnectionManager, Endpoint, Error as CoreError, ShutdownSignal};

use crate::config::AgentConfig;
use crate::error::Error;

/// Drives a [`ConnectionManager`] through successive sessions.
pub struct Driver<E: Endpoint> {
    manager: ConnectionManager<E>,
    master: Option<String>,
    tracking_interval: Duration,
    poll_interval: Duration,
}

impl<E: Endpoint> Driver<E> {
    pub fn new(manager: ConnectionManager<E>, config: &AgentConfig) -> Self {
        Self {
            manager,
            master: config.master.clone(),
            tracking_interval: config.tracking_interval,
            poll_interval: config.poll_interval,
        }
    }

    pub fn manager(&self) -> &ConnectionManager<E> {
        &self.manager
    }

    /// Run sessions until `shutdown` fires.
    pub async fn run(&mut self, shutdown: &ShutdownSignal) -> Result<(), Error> {
        while !shutdown.is_cancelled() {
            if !self.connect(shutdown).await? {
                if shutdown.is_cancelled() {
                    break;
                }
                return Err(Error::EndpointClosed);
            }

            self.run_session(shutdown).await?;
            self.manager.close_broker_connection();
        }

        self.manager.close_broker_connection();
        tracing::info!("agent stopped");
        Ok(())
    }

    async fn connect(&mut self, shutdown: &ShutdownSignal) -> Result<bool, Error> {
        if let Some(master) = &self.master {
            let retry_interval = self.manager.config().retry_interval;
            return Ok(self
                .manager
                .connect_to_master(master, retry_interval, shutdown)
                .await?);
        }

        // Waiting for a status batch is cancel-safe, so bound it to recheck shutdown.
        loop {
            if shutdown.is_cancelled() {
                return Ok(false);
            }
            match tokio::time::timeout(
                self.poll_interval,
                self.manager.listen_for_broker_connection(),
            )
            .await
            {
                Ok(connected) => return Ok(connected?),
                Err(_) => continue,
            }
        }
    }

    async fn run_session(&mut self, shutdown: &ShutdownSignal) -> Result<(), Error> {
        // Topic negotiation.
        loop {
            if !self.wait_for_messages(shutdown).await? {
                return Ok(());
            }
            match self.manager.get_and_set_topic() {
                Ok(true) => break,
                Ok(false) => {
                    tracing::info!("link lost after topic assignment");
                    return Ok(());
                }
                Err(CoreError::TopicNegotiation) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // Initial subscriptions. Rejected queries are dropped, so retrying
        // with the remaining ones terminates.
        if !self.wait_for_messages(shutdown).await? {
            return Ok(());
        }
        let mut outcome = self.manager.get_and_process_query();
        while matches!(outcome, Err(CoreError::Directive(_)))
            && self.manager.query_manager().pending_count() > 0
        {
            outcome = self.manager.get_and_process_query();
        }
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_session_fatal() => {
                tracing::warn!(error = %e, "session lost");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "continuing with the queries that were accepted");
            }
        }

        self.track(shutdown).await
    }

    async fn track(&mut self, shutdown: &ShutdownSignal) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(self.tracking_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if shutdown.is_cancelled() {
                return Ok(());
            }
            if !self.manager.is_connection_alive() {
                tracing::info!("link lost while tracking");
                return Ok(());
            }

            match self.manager.track_response_changes(shutdown) {
                Ok(0) => {}
                Ok(changes) => tracing::debug!(changes, "subscriptions updated"),
                Err(e) if e.is_session_fatal() => return Ok(()),
                Err(e) => tracing::warn!(error = %e, "tracking pass failed"),
            }
        }
    }

    /// Poll until the queue has messages. Returns false on shutdown or link loss.
    async fn wait_for_messages(&mut self, shutdown: &ShutdownSignal) -> Result<bool, Error> {
        loop {
            if shutdown.is_cancelled() || !self.manager.is_connection_alive() {
                return Ok(false);
            }
            if self.manager.has_pending_messages()? {
                return Ok(true);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
