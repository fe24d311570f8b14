//! Startup against a broker that is not there
//!
//! A connection attempt is made exactly once. When nothing listens on the
//! broker port the connect call fails with a connectivity error instead of
//! retrying, and the session is never created.

use mempool_subscriber::config::{BrokerSection, ConfigError};
use mempool_subscriber::transport::mqtt::MqttClient;
use mempool_subscriber::transport::Transport;
use mempool_subscriber::{ConnectionManager, ConnectionState, Credential, SubscriberError};
use std::time::Duration;
use tokio::time::timeout;

/// A local port with nothing listening on it
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn settings_for(url: String) -> BrokerSection {
    BrokerSection {
        url,
        connect_timeout_secs: 3,
        ..BrokerSection::default()
    }
}

#[tokio::test]
async fn test_unreachable_broker_is_connectivity_error() {
    let settings = settings_for(format!("mqtt://127.0.0.1:{}", closed_port()));
    let manager = ConnectionManager::new(settings);
    let credential = Credential::new("test-token").unwrap();

    let result = timeout(Duration::from_secs(5), manager.connect(&credential))
        .await
        .expect("connect should give up on its own");

    assert!(matches!(result, Err(SubscriberError::Connectivity { .. })));
}

#[tokio::test]
async fn test_failed_client_does_not_retry() {
    let settings = settings_for(format!("mqtt://127.0.0.1:{}", closed_port()));
    let credential = Credential::new("test-token").unwrap();
    let mut client = MqttClient::new(&settings, &credential).unwrap();

    assert!(client.connect().await.is_err());
    assert!(matches!(
        client.connection_state(),
        ConnectionState::Unreachable(_)
    ));
    assert!(!client.is_connected());

    // The single attempt is spent
    assert!(matches!(
        client.connect().await,
        Err(SubscriberError::InvalidState { .. })
    ));

    // Closing after a failed connect is harmless
    client.close().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_error_text_never_contains_token() {
    let settings = settings_for(format!("mqtt://127.0.0.1:{}", closed_port()));
    let manager = ConnectionManager::new(settings);
    let secret = "s3cr3t-bearer-value";

    let error = manager
        .connect_with_token(secret)
        .await
        .err()
        .expect("connect should fail");

    assert!(!error.to_string().contains(secret));
    assert!(!format!("{error:?}").contains(secret));
}

#[tokio::test]
async fn test_bad_url_fails_before_any_io() {
    let manager = ConnectionManager::new(settings_for("ftp://broker.example.com".to_string()));
    let result = manager.connect_with_token("test-token").await;

    assert!(matches!(
        result,
        Err(SubscriberError::Configuration(ConfigError::InvalidBrokerUrl(_)))
    ));
}
