//! Subscription loop contract tests
//!
//! Runs the loop against the in-memory transport: delivery order, cancellation
//! while idle and while a handler is running, connection loss and handler
//! failures.

use async_trait::async_trait;
use mempool_subscriber::testing::MockTransport;
use mempool_subscriber::{
    FnHandler, Handler, HandlerError, LinePrinter, LoopState, Message, Session, StopReason,
    SubscriberError, SubscriptionLoop,
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "staking.osmosis.mempool";

/// Writer whose contents stay visible to the test while the loop owns it
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    fn line_count(&self) -> usize {
        self.text().lines().count()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_received_messages_printed_in_order_after_termination() {
    let (transport, broker) = MockTransport::new();
    let mut session = Session::establish(transport).await.unwrap();
    let output = SharedBuffer::default();

    let mut subscription = SubscriptionLoop::new();
    subscription
        .subscribe(&mut session, TOPIC, LinePrinter::new(output.clone()))
        .await
        .unwrap();

    for payload in ["a", "b", "c"] {
        assert!(broker.publish(TOPIC, payload).await);
    }

    // What a SIGTERM would do, with all three still queued
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = subscription.run(&mut session, cancel).await.unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.delivered, 3);
    assert_eq!(output.text(), "a\nb\nc\n");
    assert_eq!(subscription.state(), LoopState::Stopped);

    // Released: later traffic has nowhere to go
    assert!(!broker.publish(TOPIC, "d").await);
    assert_eq!(output.text(), "a\nb\nc\n");

    session.close().await.unwrap();
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test]
async fn test_idle_cancellation_returns_promptly() {
    let (transport, _broker) = MockTransport::new();
    let mut session = Session::establish(transport).await.unwrap();

    let mut subscription = SubscriptionLoop::new();
    subscription
        .subscribe(&mut session, TOPIC, LinePrinter::new(Vec::new()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let report = timeout(Duration::from_secs(1), subscription.run(&mut session, cancel))
        .await
        .expect("run should return soon after cancellation")
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.delivered, 0);
    let printed = subscription.into_handler().unwrap().into_inner();
    assert!(printed.is_empty());
}

/// Handler that takes a while on every message
struct SlowHandler {
    started: Arc<Notify>,
    finished: Arc<AtomicBool>,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Handler for SlowHandler {
    async fn handle(&mut self, message: Message) -> Result<(), HandlerError> {
        self.seen
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&message.payload).to_string());
        self.started.notify_one();
        sleep(Duration::from_millis(100)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_in_flight_handler_completes_and_queue_drains_on_cancellation() {
    let (transport, broker) = MockTransport::new();
    let mut session = Session::establish(transport).await.unwrap();

    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = SlowHandler {
        started: started.clone(),
        finished: finished.clone(),
        seen: seen.clone(),
    };

    let mut subscription = SubscriptionLoop::new();
    subscription
        .subscribe(&mut session, TOPIC, handler)
        .await
        .unwrap();

    assert!(broker.publish(TOPIC, "first").await);
    assert!(broker.publish(TOPIC, "second").await);

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        let broker = broker.clone();
        tokio::spawn(async move {
            started.notified().await;
            cancel.cancel();
            // Let the loop observe cancellation while "first" is still being handled
            sleep(Duration::from_millis(20)).await;
            broker.publish(TOPIC, "late").await
        })
    };

    let report = subscription.run(&mut session, cancel).await.unwrap();
    let late_accepted = canceller.await.unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert!(finished.load(Ordering::SeqCst), "handler was interrupted");
    assert!(!late_accepted, "message after cancellation was accepted");
    assert_eq!(report.delivered, 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first".to_string(), "second".to_string()]
    );
}

#[tokio::test]
async fn test_connection_loss_ends_run() {
    let (transport, broker) = MockTransport::new();
    let mut session = Session::establish(transport).await.unwrap();
    let output = SharedBuffer::default();

    let mut subscription = SubscriptionLoop::new();
    subscription
        .subscribe(&mut session, TOPIC, LinePrinter::new(output.clone()))
        .await
        .unwrap();

    let dropper = {
        let broker = broker.clone();
        let output = output.clone();
        tokio::spawn(async move {
            assert!(broker.publish(TOPIC, "before").await);
            wait_until(|| output.line_count() == 1).await;
            broker.drop_connection("broker went away");
        })
    };

    let report = timeout(
        Duration::from_secs(2),
        subscription.run(&mut session, CancellationToken::new()),
    )
    .await
    .expect("run should end on connection loss")
    .unwrap();
    dropper.await.unwrap();

    assert_eq!(
        report.stop,
        StopReason::ConnectionLost("broker went away".to_string())
    );
    assert_eq!(report.delivered, 1);
    assert!(matches!(
        report.into_result(),
        Err(SubscriberError::ConnectionLost { .. })
    ));

    // Closing after a failure is still fine
    assert!(!session.is_live());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_handler_error_does_not_stop_delivery() {
    let (transport, broker) = MockTransport::new();
    let mut session = Session::establish(transport).await.unwrap();

    let cancel = CancellationToken::new();
    let printed = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let printed = printed.clone();
        let cancel = cancel.clone();
        FnHandler(move |message: Message| {
            let text = String::from_utf8_lossy(&message.payload).to_string();
            if text == "bad" {
                return Err(HandlerError::rejected("cannot handle 'bad'"));
            }
            printed.lock().unwrap().push(text);
            cancel.cancel();
            Ok(())
        })
    };

    let mut subscription = SubscriptionLoop::new();
    subscription
        .subscribe(&mut session, TOPIC, handler)
        .await
        .unwrap();

    assert!(broker.publish(TOPIC, "bad").await);
    assert!(broker.publish(TOPIC, "ok").await);

    let report = subscription.run(&mut session, cancel).await.unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.handler_failures, 1);
    assert_eq!(*printed.lock().unwrap(), vec!["ok".to_string()]);
}

#[tokio::test]
async fn test_use_after_close_fails() {
    let (transport, broker) = MockTransport::new();
    let mut session = Session::establish(transport).await.unwrap();
    session.close().await.unwrap();

    let mut subscription = SubscriptionLoop::new();
    let result = subscription
        .subscribe(&mut session, TOPIC, LinePrinter::new(Vec::new()))
        .await;

    assert!(matches!(result, Err(SubscriberError::NotConnected { .. })));
    assert!(broker.subscriptions().is_empty());
}

#[tokio::test]
async fn test_rejected_credential_creates_no_session() {
    let (transport, broker) = MockTransport::rejecting();
    let result = Session::establish(transport).await;

    assert!(matches!(result, Err(SubscriberError::Authentication { .. })));
    assert_eq!(broker.connect_attempts(), 1);
}

#[tokio::test]
async fn test_handler_is_never_reentered() {
    struct Exclusive {
        busy: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
        cancel: CancellationToken,
        expected: usize,
    }

    #[async_trait]
    impl Handler for Exclusive {
        async fn handle(&mut self, _message: Message) -> Result<(), HandlerError> {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "handler re-entered");
            tokio::task::yield_now().await;
            self.busy.store(false, Ordering::SeqCst);
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.expected {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    let (transport, broker) = MockTransport::new();
    let mut session = Session::establish(transport).await.unwrap();
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut subscription = SubscriptionLoop::with_capacity(4);
    subscription
        .subscribe(
            &mut session,
            TOPIC,
            Exclusive {
                busy: Arc::new(AtomicBool::new(false)),
                calls: calls.clone(),
                cancel: cancel.clone(),
                expected: 20,
            },
        )
        .await
        .unwrap();

    // More messages than the channel holds, so the publisher waits on the loop
    let publisher = tokio::spawn(async move {
        for i in 0..20 {
            assert!(broker.publish(TOPIC, format!("m{i}")).await);
        }
    });

    let report = timeout(Duration::from_secs(2), subscription.run(&mut session, cancel))
        .await
        .expect("run should finish")
        .unwrap();
    publisher.await.unwrap();

    assert_eq!(report.delivered, 20);
    assert_eq!(calls.load(Ordering::SeqCst), 20);
}
