//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the session and delivery loop
//! are written against, plus the MQTT implementation used in production.

use crate::error::SubscriberResult;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

pub mod mqtt;

/// A message received under a subscription. Transient: lives only as long as
/// the handler invocation it is passed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Liveness of a broker connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Created, no connection attempt made yet
    Idle,
    /// Waiting for the broker to acknowledge the connection
    Connecting,
    /// Authenticated and usable
    Connected,
    /// The broker refused the credential
    Rejected(String),
    /// The broker could not be reached
    Unreachable(String),
    /// The connection dropped after it was established
    Lost(String),
    /// Closed by the client
    Closed,
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// No further transition is possible from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Rejected(_)
                | ConnectionState::Unreachable(_)
                | ConnectionState::Lost(_)
                | ConnectionState::Closed
        )
    }
}

/// Transport trait for broker communication
///
/// One value represents one connection attempt and at most one live connection.
/// Implementations make a single attempt in `connect` and never reconnect.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Connect and authenticate, returning once the broker has acknowledged
    async fn connect(&mut self) -> SubscriberResult<()>;

    /// Release the connection. Idempotent, also after a failure.
    async fn close(&mut self) -> SubscriberResult<()>;

    /// Subscribe to `topic`; matching messages arrive on the returned receiver
    /// in broker delivery order
    async fn subscribe(
        &mut self,
        topic: &str,
        capacity: usize,
    ) -> SubscriberResult<mpsc::Receiver<Message>>;

    /// Stop routing `topic` and tell the broker when still connected
    async fn unsubscribe(&mut self, topic: &str) -> SubscriberResult<()>;

    /// Watch channel tracking connection state changes
    fn state_watch(&self) -> watch::Receiver<ConnectionState>;

    /// Broker address this transport talks to
    fn broker_url(&self) -> &str;

    fn connection_state(&self) -> ConnectionState {
        self.state_watch().borrow().clone()
    }

    fn is_connected(&self) -> bool {
        self.connection_state().is_live()
    }
}

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::MqttClient;
