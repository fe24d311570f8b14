//! MQTT v5 transport for the subscriber
//!
//! The client is split the same way as the rest of the transport code: pure
//! option building and error classification, pure event routing, and the
//! impure client that owns the socket and the background event loop.
//!
//! - [`connection`] - options from config, CONNACK failure classification
//! - [`message_handler`] - event routing and forwarding into the delivery channel
//! - [`client`] - I/O, the event loop task and the [`Transport`](super::Transport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use mempool_subscriber::config::BrokerSection;
//! use mempool_subscriber::credential::Credential;
//! use mempool_subscriber::transport::mqtt::MqttClient;
//! use mempool_subscriber::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let credential = Credential::new("my-token")?;
//! let mut client = MqttClient::new(&BrokerSection::default(), &credential)?;
//! client.connect().await?;
//! let mut inbound = client.subscribe("staking.osmosis.mempool", 64).await?;
//! while let Some(message) = inbound.recv().await {
//!     println!("{}", String::from_utf8_lossy(&message.payload));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{classify_connection_error, configure_mqtt_options, ConnectFailure};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
