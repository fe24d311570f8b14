//! Mock implementations for testing
//!
//! [`MockTransport`] is an in-memory stand-in for the MQTT client. Each mock is
//! paired with a [`MockBroker`] handle that plays the broker's part: it
//! publishes messages, drops the connection and records what the client did.

use crate::error::{SubscriberError, SubscriberResult};
use crate::transport::{ConnectionState, Message, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

/// How the mock broker answers a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    RejectCredential,
    Unreachable,
}

#[derive(Debug, Default)]
struct BrokerRecord {
    route: Option<(String, mpsc::Sender<Message>)>,
    connect_attempts: u32,
    subscriptions: Vec<String>,
    unsubscriptions: Vec<String>,
    close_calls: u32,
}

type SharedRecord = Arc<Mutex<BrokerRecord>>;

fn lock(record: &SharedRecord) -> MutexGuard<'_, BrokerRecord> {
    record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory transport
#[derive(Debug)]
pub struct MockTransport {
    behavior: ConnectBehavior,
    record: SharedRecord,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
}

/// Broker side of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockBroker {
    record: SharedRecord,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl MockTransport {
    /// A transport whose broker accepts the connection
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, MockBroker) {
        Self::with_behavior(ConnectBehavior::Accept)
    }

    /// A transport whose broker refuses the credential
    pub fn rejecting() -> (Self, MockBroker) {
        Self::with_behavior(ConnectBehavior::RejectCredential)
    }

    /// A transport whose broker cannot be reached
    pub fn unreachable() -> (Self, MockBroker) {
        Self::with_behavior(ConnectBehavior::Unreachable)
    }

    pub fn with_behavior(behavior: ConnectBehavior) -> (Self, MockBroker) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let state_tx = Arc::new(state_tx);
        let record = SharedRecord::default();

        let transport = Self {
            behavior,
            record: record.clone(),
            state_tx: state_tx.clone(),
            state_rx,
        };
        let broker = MockBroker { record, state_tx };
        (transport, broker)
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_replace(next);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> SubscriberResult<()> {
        let attempts = {
            let mut record = lock(&self.record);
            record.connect_attempts += 1;
            record.connect_attempts
        };
        if attempts > 1 {
            return Err(SubscriberError::InvalidState {
                operation: "connect",
                state: format!("{:?}", self.connection_state()),
            });
        }

        self.set_state(ConnectionState::Connecting);
        match self.behavior {
            ConnectBehavior::Accept => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            ConnectBehavior::RejectCredential => {
                self.set_state(ConnectionState::Rejected("NotAuthorized".to_string()));
                Err(SubscriberError::authentication("NotAuthorized"))
            }
            ConnectBehavior::Unreachable => {
                self.set_state(ConnectionState::Unreachable("connection refused".to_string()));
                Err(SubscriberError::connectivity("connection refused"))
            }
        }
    }

    async fn close(&mut self) -> SubscriberResult<()> {
        let mut record = lock(&self.record);
        record.close_calls += 1;
        record.route = None;
        self.set_state(ConnectionState::Closed);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        capacity: usize,
    ) -> SubscriberResult<mpsc::Receiver<Message>> {
        let state = self.connection_state();
        if !state.is_live() {
            return Err(SubscriberError::NotConnected { state });
        }

        let (sender, receiver) = mpsc::channel(capacity);
        let mut record = lock(&self.record);
        record.subscriptions.push(topic.to_string());
        record.route = Some((topic.to_string(), sender));
        Ok(receiver)
    }

    async fn unsubscribe(&mut self, topic: &str) -> SubscriberResult<()> {
        let mut record = lock(&self.record);
        record.unsubscriptions.push(topic.to_string());
        if matches!(&record.route, Some((routed, _)) if routed == topic) {
            record.route = None;
        }
        Ok(())
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn broker_url(&self) -> &str {
        "mock://broker"
    }
}

impl MockBroker {
    /// Deliver a message on `topic`. Returns whether a subscriber received it.
    /// Waits when the subscriber's channel is full.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let sender = {
            let record = lock(&self.record);
            match &record.route {
                Some((routed, sender)) if routed == topic => Some(sender.clone()),
                _ => None,
            }
        };

        match sender {
            Some(sender) => sender.send(Message::new(topic, payload)).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the connection dropping underneath the client
    pub fn drop_connection(&self, reason: &str) {
        lock(&self.record).route = None;
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                return false;
            }
            *state = ConnectionState::Lost(reason.to_string());
            true
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.record).connect_attempts
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.record).subscriptions.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        lock(&self.record).unsubscriptions.clone()
    }

    pub fn close_calls(&self) -> u32 {
        lock(&self.record).close_calls
    }

    pub fn has_subscriber(&self) -> bool {
        lock(&self.record).route.is_some()
    }
}
