//! Connection manager and the session it produces
//!
//! [`ConnectionManager::connect`] makes exactly one authenticated connection
//! attempt and returns a live [`Session`]. The session owns the transport and is
//! the only place its liveness changes: on [`Session::close`] or when the
//! transport reports a fatal failure.

use crate::config::BrokerSection;
use crate::credential::Credential;
use crate::error::{SubscriberError, SubscriberResult};
use crate::session_span;
use crate::transport::{ConnectionState, MqttTransport, Transport};
use tokio::sync::watch;
use tracing::{info, Instrument};

/// Builds sessions from broker settings
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    settings: BrokerSection,
}

impl ConnectionManager {
    pub fn new(settings: BrokerSection) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BrokerSection {
        &self.settings
    }

    /// Connect to the configured broker with `credential`.
    ///
    /// Fails with a configuration error for a bad URL before any socket is
    /// opened, an authentication error when the broker refuses the credential,
    /// and a connectivity error when it cannot be reached. No retry.
    pub async fn connect(
        &self,
        credential: &Credential,
    ) -> SubscriberResult<Session<MqttTransport>> {
        let transport = MqttTransport::new(&self.settings, credential)?;
        Session::establish(transport).await
    }

    /// Same as [`connect`](Self::connect) for a raw token. An empty token is a
    /// configuration error raised before any network I/O.
    pub async fn connect_with_token(
        &self,
        token: &str,
    ) -> SubscriberResult<Session<MqttTransport>> {
        let credential = Credential::new(token)?;
        self.connect(&credential).await
    }
}

/// One authenticated connection to the broker
pub struct Session<T: Transport> {
    transport: T,
    state_rx: watch::Receiver<ConnectionState>,
}

impl<T: Transport> Session<T> {
    /// Connect `transport` and wrap it once the broker has acknowledged
    pub async fn establish(mut transport: T) -> SubscriberResult<Self> {
        let span = session_span!(broker = %transport.broker_url());
        async {
            transport.connect().await?;
            info!("Session established");
            Ok::<(), SubscriberError>(())
        }
        .instrument(span)
        .await?;

        let state_rx = transport.state_watch();
        Ok(Self {
            transport,
            state_rx,
        })
    }

    pub fn broker_url(&self) -> &str {
        self.transport.broker_url()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_live(&self) -> bool {
        self.state_rx.borrow().is_live()
    }

    /// Watch liveness changes without holding the session
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Error unless the session can still be used
    pub fn ensure_live(&self) -> SubscriberResult<()> {
        let state = self.connection_state();
        if !state.is_live() {
            return Err(SubscriberError::NotConnected { state });
        }
        Ok(())
    }

    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the connection. Safe to call repeatedly and after a failure.
    pub async fn close(&mut self) -> SubscriberResult<()> {
        if self.connection_state() == ConnectionState::Closed {
            return Ok(());
        }
        self.transport.close().await?;
        info!(broker = %self.broker_url(), "Session closed");
        Ok(())
    }
}
