//! The subscription loop
//!
//! Binds one topic to one [`Handler`] on a live [`Session`] and drives delivery
//! until cancellation or connection loss.
//!
//! Lifecycle: `Idle -> Subscribed -> Running -> ShuttingDown -> Stopped`.
//! Handlers run one at a time, in broker delivery order, on the task that calls
//! [`SubscriptionLoop::run`]. On cancellation the inbound channel is closed,
//! messages already received are still handed to the handler, and nothing that
//! arrives afterwards is dispatched. A handler that has started always runs to
//! completion.

use crate::delivery_span;
use crate::error::{sanitize_error_message, SubscriberError, SubscriberResult};
use crate::handler::Handler;
use crate::session::Session;
use crate::transport::{ConnectionState, Message, Transport};
use std::fmt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Default capacity of the inbound delivery channel
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Subscribed,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The cancellation token fired
    Cancelled,
    /// The session failed or was closed while running
    ConnectionLost(String),
}

/// Terminal result of [`SubscriptionLoop::run`]
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub stop: StopReason,
    /// Messages handed to the handler
    pub delivered: u64,
    /// Deliveries whose handler returned an error
    pub handler_failures: u64,
}

impl RunReport {
    /// Turn a connection loss into an error, keep a cancelled run as success
    pub fn into_result(self) -> SubscriberResult<Self> {
        match &self.stop {
            StopReason::Cancelled => Ok(self),
            StopReason::ConnectionLost(reason) => Err(SubscriberError::connection_lost(reason)),
        }
    }
}

/// Delivers messages for one topic to one handler
pub struct SubscriptionLoop<H: Handler> {
    state: LoopState,
    capacity: usize,
    topic: Option<String>,
    handler: Option<H>,
    inbound: Option<mpsc::Receiver<Message>>,
}

impl<H: Handler> Default for SubscriptionLoop<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handler> SubscriptionLoop<H> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOUND_CAPACITY)
    }

    /// `capacity` bounds how many received messages may wait for the handler
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: LoopState::Idle,
            capacity: capacity.max(1),
            topic: None,
            handler: None,
            inbound: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Take the handler back once the loop has stopped
    pub fn into_handler(self) -> Option<H> {
        self.handler
    }

    fn invalid_state(&self, operation: &'static str) -> SubscriberError {
        SubscriberError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Register `handler` for `topic` on a live session. Returns as soon as the
    /// subscription request is sent; delivery starts when [`run`](Self::run) is
    /// called.
    pub async fn subscribe<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        topic: &str,
        handler: H,
    ) -> SubscriberResult<()> {
        if self.state != LoopState::Idle {
            return Err(self.invalid_state("subscribe"));
        }
        session.ensure_live()?;

        let inbound = session
            .transport_mut()
            .subscribe(topic, self.capacity)
            .await?;

        self.topic = Some(topic.to_string());
        self.handler = Some(handler);
        self.inbound = Some(inbound);
        self.state = LoopState::Subscribed;
        info!(topic = %topic, "Subscribed");
        Ok(())
    }

    /// Deliver messages until `cancel` fires or the session stops being live.
    ///
    /// This is the only blocking call. It returns a [`RunReport`]; connection
    /// loss is reported as [`StopReason::ConnectionLost`], not as an error.
    /// Calling it outside the `Subscribed` state is an error.
    pub async fn run<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        cancel: CancellationToken,
    ) -> SubscriberResult<RunReport> {
        if self.state != LoopState::Subscribed {
            return Err(self.invalid_state("run"));
        }
        let (Some(mut handler), Some(mut inbound)) = (self.handler.take(), self.inbound.take())
        else {
            return Err(self.invalid_state("run"));
        };

        self.state = LoopState::Running;
        info!(topic = self.topic.as_deref().unwrap_or_default(), "Waiting for messages");

        let mut liveness = session.watch();
        let report = deliver(&mut handler, &mut inbound, &mut liveness, &cancel).await;

        self.state = LoopState::ShuttingDown;
        debug!(stop = ?report.stop, "Releasing subscription");

        // Dropping the receiver first unblocks a producer waiting on a full channel
        drop(inbound);
        if let Some(topic) = self.topic.as_deref() {
            if let Err(e) = session.transport_mut().unsubscribe(topic).await {
                warn!("Failed to release subscription on {}: {}", topic, e);
            }
        }

        self.handler = Some(handler);
        self.state = LoopState::Stopped;

        match &report.stop {
            StopReason::Cancelled => info!(
                delivered = report.delivered,
                handler_failures = report.handler_failures,
                "Subscription stopped"
            ),
            StopReason::ConnectionLost(reason) => warn!(
                delivered = report.delivered,
                handler_failures = report.handler_failures,
                "Subscription stopped, connection lost: {}",
                reason
            ),
        }
        Ok(report)
    }
}

fn lost_reason(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Lost(reason)
        | ConnectionState::Rejected(reason)
        | ConnectionState::Unreachable(reason) => reason.clone(),
        ConnectionState::Closed => "session closed".to_string(),
        other => format!("session not live ({other:?})"),
    }
}

#[derive(Default)]
struct Tally {
    delivered: u64,
    handler_failures: u64,
}

impl Tally {
    fn report(self, stop: StopReason) -> RunReport {
        RunReport {
            stop,
            delivered: self.delivered,
            handler_failures: self.handler_failures,
        }
    }
}

/// Run the handler on one message. If `cancel` fires meanwhile the inbound
/// channel is closed at once, so only messages received before cancellation
/// remain; the handler itself is never interrupted.
async fn dispatch<H: Handler>(
    handler: &mut H,
    message: Message,
    inbound: &mut mpsc::Receiver<Message>,
    cancel: &CancellationToken,
    tally: &mut Tally,
) {
    let seq = tally.delivered + 1;
    let span = delivery_span!(topic = %message.topic, seq, bytes = message.payload.len());
    let handled = handler.handle(message).instrument(span);
    tokio::pin!(handled);

    let outcome = if cancel.is_cancelled() {
        handled.await
    } else {
        tokio::select! {
            biased;

            outcome = &mut handled => outcome,

            _ = cancel.cancelled() => {
                inbound.close();
                handled.await
            }
        }
    };
    tally.delivered = seq;

    if let Err(e) = outcome {
        tally.handler_failures += 1;
        warn!(
            seq,
            error = %sanitize_error_message(&e.to_string()),
            "Handler failed, continuing with next message"
        );
    }
}

/// Hand over what was received before cancellation, then stop
async fn drain<H: Handler>(
    handler: &mut H,
    inbound: &mut mpsc::Receiver<Message>,
    cancel: &CancellationToken,
    tally: &mut Tally,
) {
    inbound.close();
    let mut drained = 0u64;
    while let Ok(message) = inbound.try_recv() {
        dispatch(handler, message, inbound, cancel, tally).await;
        drained += 1;
    }
    if drained > 0 {
        debug!(drained, "Delivered messages received before cancellation");
    }
}

async fn deliver<H: Handler>(
    handler: &mut H,
    inbound: &mut mpsc::Receiver<Message>,
    liveness: &mut watch::Receiver<ConnectionState>,
    cancel: &CancellationToken,
) -> RunReport {
    let mut tally = Tally::default();

    let stop = loop {
        let state = liveness.borrow_and_update().clone();
        if !state.is_live() {
            break StopReason::ConnectionLost(lost_reason(&state));
        }

        let message = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                drain(handler, inbound, cancel, &mut tally).await;
                break StopReason::Cancelled;
            }

            changed = liveness.changed() => {
                if changed.is_err() {
                    break StopReason::ConnectionLost("session state channel closed".to_string());
                }
                continue;
            }

            received = inbound.recv() => match received {
                Some(message) => message,
                None => {
                    let state = liveness.borrow().clone();
                    let reason = if state.is_live() {
                        "delivery channel closed".to_string()
                    } else {
                        lost_reason(&state)
                    };
                    break StopReason::ConnectionLost(reason);
                }
            },
        };

        dispatch(handler, message, inbound, cancel, &mut tally).await;
    };

    tally.report(stop)
}
