//! OS signal handling
//!
//! SIGINT and SIGTERM both cancel one shared [`CancellationToken`]. Anything
//! that holds a clone (the subscription loop, the binary) observes it.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first SIGINT or SIGTERM.
///
/// The task ends after cancelling, or as soon as the token is cancelled by
/// someone else. Later signals find it already cancelled and change nothing.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            name = wait_for_signal() => match name {
                Some(name) => {
                    info!("Received {}, shutting down gracefully...", name);
                    token.cancel();
                }
                None => {
                    warn!("Signal handling unavailable, only explicit cancellation will stop the subscriber");
                    token.cancelled().await;
                }
            },
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGINT handler: {}", e);
            return None;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            return None;
        }
    };

    tokio::select! {
        _ = sigint.recv() => Some("SIGINT"),
        _ = sigterm.recv() => Some("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<&'static str> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some("Ctrl-C"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C: {}", e);
            None
        }
    }
}
