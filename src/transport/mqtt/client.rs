//! Impure I/O operations for the MQTT client
//!
//! This module owns the rumqttc client, the background event loop task and the
//! connection state channel. One `MqttClient` makes exactly one connection
//! attempt; when the connection drops it stays down.

use super::connection::{configure_mqtt_options, state_after_error};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::BrokerSection;
use crate::credential::Credential;
use crate::error::{SubscriberError, SubscriberResult};
use crate::transport::{ConnectionState, Message, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `close` waits for the event loop to flush DISCONNECT
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// MQTT v5 transport client
pub struct MqttClient {
    broker_url: String,
    client: AsyncClient,
    // Mutex only to make the client Sync; taken once in connect
    event_loop: Mutex<Option<EventLoop>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    message_forwarder: Arc<Mutex<MessageForwarder>>,
    shutdown: CancellationToken,
    event_loop_handle: Option<JoinHandle<()>>,
    connect_timeout: Duration,
}

impl MqttClient {
    /// Build a client from config. Validates the broker URL; opens no socket.
    pub fn new(settings: &BrokerSection, credential: &Credential) -> SubscriberResult<Self> {
        let mqtt_options = configure_mqtt_options(settings, credential)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        Ok(MqttClient {
            broker_url: settings.url.clone(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            state_tx: Arc::new(state_tx),
            state_rx,
            message_forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
            shutdown: CancellationToken::new(),
            event_loop_handle: None,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        })
    }

    /// Wait until the connection attempt settles, or time out
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> SubscriberResult<()> {
        let settled = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Rejected(reason) => {
                        return Err(SubscriberError::authentication(reason));
                    }
                    ConnectionState::Unreachable(reason) | ConnectionState::Lost(reason) => {
                        return Err(SubscriberError::connectivity(reason));
                    }
                    ConnectionState::Closed => {
                        return Err(SubscriberError::connectivity(
                            "connection closed before acknowledgement",
                        ));
                    }
                    ConnectionState::Idle | ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(SubscriberError::connectivity("state channel closed"));
                }
            }
        })
        .await;

        match settled {
            Ok(result) => result,
            Err(_) => Err(SubscriberError::connectivity(format!(
                "no CONNACK within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Apply a state transition. `Closed` is sticky.
    fn transition(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
        state_tx.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            debug!(target: "mqtt_transport", "Connection state {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }

    /// Background task: poll rumqttc, track state, forward publishes
    async fn drive_event_loop(
        mut event_loop: EventLoop,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        message_forwarder: Arc<Mutex<MessageForwarder>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(target: "mqtt_transport", "Shutdown requested, stopping event loop");
                    break;
                }

                polled = event_loop.poll() => match polled {
                    Ok(event) => {
                        let route = MessageHandler::route_mqtt_event(&event);
                        if !Self::process_event_route(route, &state_tx, &message_forwarder).await {
                            break;
                        }
                    }
                    Err(e) => {
                        let next = state_after_error(&state_tx.borrow(), &e);
                        if matches!(next, ConnectionState::Lost(_)) {
                            error!("MQTT connection lost: {}", e);
                        } else if next != ConnectionState::Closed {
                            error!("MQTT connection failed: {}", e);
                        }
                        Self::transition(&state_tx, next);
                        break;
                    }
                }
            }
        }
        info!("MQTT event loop stopped");
    }

    /// Process a routed event. Returns false when the event loop should stop.
    async fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        message_forwarder: &Arc<Mutex<MessageForwarder>>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                info!("MQTT client connected successfully");
                Self::transition(state_tx, ConnectionState::Connected);
                true
            }
            EventRoute::ConnectionRefused(code) => {
                Self::transition(
                    state_tx,
                    ConnectionState::Rejected(format!("broker refused connection: {code}")),
                );
                false
            }
            EventRoute::MessageReceived { topic, payload } => {
                Self::handle_message_received(message_forwarder, &topic, payload).await;
                true
            }
            EventRoute::Disconnected(reason) => {
                warn!("MQTT broker disconnected client: {}", reason);
                Self::transition(
                    state_tx,
                    ConnectionState::Lost(format!("broker sent DISCONNECT ({reason})")),
                );
                false
            }
            EventRoute::DisconnectSent => false,
            EventRoute::SubscriptionConfirmed {
                packet_id,
                accepted,
            } => {
                if accepted {
                    debug!(target: "mqtt_transport", "Subscription confirmed (pkid {})", packet_id);
                } else {
                    error!("Broker refused subscription (pkid {})", packet_id);
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Forward a publish into the delivery channel if its topic is routed
    async fn handle_message_received(
        message_forwarder: &Arc<Mutex<MessageForwarder>>,
        topic: &str,
        payload: Bytes,
    ) {
        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);

        let sender = message_forwarder.lock().await.sender_for(topic);
        let Some(sender) = sender else {
            return;
        };

        if sender.send(Message::new(topic, payload)).await.is_err() {
            debug!(target: "mqtt_transport", "Delivery loop gone, dropping message on {}", topic);
        }
    }

    fn ensure_connected(&self) -> SubscriberResult<()> {
        let state = self.state_rx.borrow().clone();
        if !state.is_live() {
            return Err(SubscriberError::NotConnected { state });
        }
        Ok(())
    }

    async fn join_event_loop(&mut self) {
        let Some(mut handle) = self.event_loop_handle.take() else {
            return;
        };

        match tokio::time::timeout(CLOSE_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!(target: "mqtt_transport", "Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                self.shutdown.cancel();
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn connect(&mut self) -> SubscriberResult<()> {
        let event_loop = self
            .event_loop
            .get_mut()
            .take()
            .ok_or_else(|| SubscriberError::InvalidState {
                operation: "connect",
                state: format!("{:?}", self.state_rx.borrow().clone()),
            })?;

        info!(broker = %self.broker_url, "Connecting to MQTT broker");
        Self::transition(&self.state_tx, ConnectionState::Connecting);

        let handle = tokio::spawn(Self::drive_event_loop(
            event_loop,
            self.state_tx.clone(),
            self.message_forwarder.clone(),
            self.shutdown.clone(),
        ));
        self.event_loop_handle = Some(handle);

        let confirmed =
            Self::wait_for_connection_confirmation(self.state_rx.clone(), self.connect_timeout)
                .await;

        if let Err(e) = &confirmed {
            // Single attempt: stop the event loop so rumqttc does not retry
            self.shutdown.cancel();
            if !self.state_rx.borrow().is_terminal() {
                Self::transition(&self.state_tx, ConnectionState::Unreachable(e.to_string()));
            }
            self.join_event_loop().await;
        }

        confirmed
    }

    async fn close(&mut self) -> SubscriberResult<()> {
        let was_live = self.state_rx.borrow().is_live();
        Self::transition(&self.state_tx, ConnectionState::Closed);
        self.message_forwarder.lock().await.clear_route();

        if was_live {
            // Best effort: the event loop stops once DISCONNECT is written
            if let Err(e) = self.client.disconnect().await {
                debug!(target: "mqtt_transport", "Disconnect request not sent: {}", e);
                self.shutdown.cancel();
            }
        } else {
            self.shutdown.cancel();
        }

        let had_task = self.event_loop_handle.is_some();
        self.join_event_loop().await;
        self.shutdown.cancel();
        *self.event_loop.get_mut() = None;

        if had_task {
            info!("MQTT client disconnected");
        }
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        capacity: usize,
    ) -> SubscriberResult<mpsc::Receiver<Message>> {
        self.ensure_connected()?;

        let (sender, receiver) = mpsc::channel(capacity);
        self.message_forwarder.lock().await.set_route(topic, sender);

        info!("Subscribing to topic: {}", topic);
        if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
            self.message_forwarder.lock().await.clear_route();
            return Err(SubscriberError::connection_lost(format!(
                "failed to subscribe to {topic}: {e}"
            )));
        }

        Ok(receiver)
    }

    async fn unsubscribe(&mut self, topic: &str) -> SubscriberResult<()> {
        {
            let mut forwarder = self.message_forwarder.lock().await;
            if forwarder.routed_topic() == Some(topic) {
                forwarder.clear_route();
            }
        }

        if self.state_rx.borrow().is_live() {
            if let Err(e) = self.client.unsubscribe(topic).await {
                warn!("Failed to unsubscribe from {}: {}", topic, e);
            } else {
                debug!(target: "mqtt_transport", "Unsubscribed from: {}", topic);
            }
        }
        Ok(())
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn broker_url(&self) -> &str {
        &self.broker_url
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // No async in Drop: stop the background task; call close() for a clean DISCONNECT
        self.shutdown.cancel();
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
