//! Pure message routing for MQTT events
//!
//! This module decides what each rumqttc event means for the subscriber and
//! holds the single route from the subscribed topic into the delivery channel.

use crate::transport::Message;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use tokio::sync::mpsc;
use tracing::debug;

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to what the event loop should do with it
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) if matches!(connack.code, ConnectReturnCode::Success) => {
                    EventRoute::ConnectionAcknowledged
                }
                Packet::ConnAck(connack) => {
                    EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                }
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    accepted: Self::subscription_accepted(&suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// A SUBACK is good when every reason code grants a QoS
    pub fn subscription_accepted(return_codes: &[SubscribeReasonCode]) -> bool {
        return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
    }

    /// Only the exact subscribed topic is delivered
    pub fn should_process_message(topic: &str, expected_topic: &str) -> bool {
        if topic != expected_topic {
            debug!("Topic mismatch: expected {}, got {}", expected_topic, topic);
            return false;
        }
        true
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker answered CONNACK with a failure code
    ConnectionRefused(String),
    /// Publish received
    MessageReceived { topic: String, payload: Bytes },
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Our DISCONNECT went out, the event loop is done
    DisconnectSent,
    /// SUBACK received
    SubscriptionConfirmed { packet_id: u16, accepted: bool },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

struct Route {
    topic: String,
    sender: mpsc::Sender<Message>,
}

/// Holds the one active topic route into the delivery loop
#[derive(Default)]
pub struct MessageForwarder {
    route: Option<Route>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the route, replacing any previous one
    pub fn set_route(&mut self, topic: &str, sender: mpsc::Sender<Message>) {
        self.route = Some(Route {
            topic: topic.to_string(),
            sender,
        });
    }

    pub fn clear_route(&mut self) {
        self.route = None;
    }

    pub fn routed_topic(&self) -> Option<&str> {
        self.route.as_ref().map(|route| route.topic.as_str())
    }

    /// Sender for messages on `topic`, if that topic is routed. Cloned so the
    /// caller can await the send without holding the forwarder lock.
    pub fn sender_for(&self, topic: &str) -> Option<mpsc::Sender<Message>> {
        self.route
            .as_ref()
            .filter(|route| MessageHandler::should_process_message(topic, &route.topic))
            .map(|route| route.sender.clone())
    }
}
