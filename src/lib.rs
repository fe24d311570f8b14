//! Mempool Subscriber
//!
//! A long-running MQTT subscriber that authenticates with an access token,
//! subscribes to one topic and prints every payload to standard output until
//! it is told to stop.
//!
//! # Overview
//!
//! - [`session`]: one authenticated broker connection ([`ConnectionManager`], [`Session`])
//! - [`subscription`]: the delivery loop binding a topic to a [`Handler`]
//! - [`handler`]: the handler trait and the stdout [`LinePrinter`]
//! - [`shutdown`]: SIGINT/SIGTERM to a shared cancellation token
//! - [`transport`]: the transport abstraction and its MQTT v5 implementation
//!
//! # Quick Start
//!
//! ```no_run
//! use mempool_subscriber::{
//!     spawn_signal_listener, ConnectionManager, Credential, LinePrinter, SubscriberConfig,
//!     SubscriptionLoop,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> mempool_subscriber::SubscriberResult<()> {
//! let config = SubscriberConfig::default();
//! let credential = Credential::from_env(&config.broker.token_env)?;
//!
//! let mut session = ConnectionManager::new(config.broker.clone())
//!     .connect(&credential)
//!     .await?;
//!
//! let mut subscription = SubscriptionLoop::with_capacity(config.subscription.inbound_capacity);
//! subscription
//!     .subscribe(&mut session, &config.subscription.topic, LinePrinter::stdout())
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! spawn_signal_listener(cancel.clone());
//! let report = subscription.run(&mut session, cancel).await?;
//! session.close().await?;
//! report.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credential;
pub mod error;
pub mod handler;
pub mod observability;
pub mod session;
pub mod shutdown;
pub mod subscription;
pub mod testing;
pub mod transport;

pub use config::{BrokerSection, ConfigError, SubscriberConfig, SubscriptionSection};
pub use credential::Credential;
pub use error::{HandlerError, SubscriberError, SubscriberResult};
pub use handler::{FnHandler, Handler, LinePrinter};
pub use session::{ConnectionManager, Session};
pub use shutdown::spawn_signal_listener;
pub use subscription::{LoopState, RunReport, StopReason, SubscriptionLoop};
pub use transport::mqtt::MqttClient;
pub use transport::{ConnectionState, Message, Transport};
