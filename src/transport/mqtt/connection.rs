//! Pure connection configuration for the MQTT client
//!
//! This module turns configuration into rumqttc options and classifies
//! connection failures. Nothing here touches the network.

use crate::config::{validate_broker_url, BrokerSection, ConfigError};
use crate::credential::Credential;
use crate::transport::ConnectionState;
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::{ConnectionError, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use uuid::Uuid;

/// Max packet size accepted from the broker
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Why a connection attempt or an established connection failed
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectFailure {
    /// The broker refused the credential
    Rejected(String),
    /// Network, DNS, TLS or any other refusal
    Unreachable(String),
}

/// Build MQTT options from config. Validates the URL, so a bad address fails
/// here before any socket is opened.
pub fn configure_mqtt_options(
    settings: &BrokerSection,
    credential: &Credential,
) -> Result<MqttOptions, ConfigError> {
    let url = validate_broker_url(&settings.url)?;
    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(settings.url.clone()))?;

    let tls = matches!(url.scheme(), "mqtts" | "ssl");
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    // Unique per attempt so a stale session on the broker never collides
    let client_id = format!("{}-{}", settings.client_id_prefix, Uuid::new_v4().simple());
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_credentials(settings.username.clone(), credential.expose().to_string());
    mqtt_options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}

/// Sort an event loop error into credential rejection or unreachability
pub fn classify_connection_error(error: &ConnectionError) -> ConnectFailure {
    match error {
        ConnectionError::ConnectionRefused(code) if is_credential_refusal(code) => {
            ConnectFailure::Rejected(format!("broker refused credential: {code:?}"))
        }
        other => ConnectFailure::Unreachable(other.to_string()),
    }
}

fn is_credential_refusal(code: &ConnectReturnCode) -> bool {
    matches!(
        code,
        ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::BadAuthenticationMethod
            | ConnectReturnCode::Banned
    )
}

/// State after an event loop error. Failures before the CONNACK are connect
/// failures; failures after it are a lost connection. A closed connection stays
/// closed.
pub fn state_after_error(current: &ConnectionState, error: &ConnectionError) -> ConnectionState {
    match current {
        ConnectionState::Closed => ConnectionState::Closed,
        ConnectionState::Connected => ConnectionState::Lost(error.to_string()),
        _ => match classify_connection_error(error) {
            ConnectFailure::Rejected(reason) => ConnectionState::Rejected(reason),
            ConnectFailure::Unreachable(reason) => ConnectionState::Unreachable(reason),
        },
    }
}
