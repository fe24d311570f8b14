//! Property tests for delivery order
//!
//! Whatever the broker sends on the subscribed topic reaches the handler
//! exactly once and in the same order, including what is still queued when
//! the run is cancelled.

use mempool_subscriber::testing::MockTransport;
use mempool_subscriber::{FnHandler, Message, Session, StopReason, SubscriptionLoop};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "staking.osmosis.mempool";

fn deliver_all(payloads: Vec<String>, capacity: usize) -> (Vec<String>, u64) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let (transport, broker) = MockTransport::new();
        let mut session = Session::establish(transport).await.unwrap();

        let expected = payloads.len();
        let cancel = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            let cancel = cancel.clone();
            FnHandler(move |message: Message| {
                let mut seen = seen.lock().unwrap();
                seen.push(String::from_utf8_lossy(&message.payload).to_string());
                if seen.len() == expected {
                    cancel.cancel();
                }
                Ok(())
            })
        };

        let mut subscription = SubscriptionLoop::with_capacity(capacity);
        subscription
            .subscribe(&mut session, TOPIC, handler)
            .await
            .unwrap();

        if expected == 0 {
            cancel.cancel();
        }

        let publisher = tokio::spawn(async move {
            for payload in payloads {
                assert!(broker.publish(TOPIC, payload).await);
                // Traffic on other topics never reaches this subscription
                assert!(!broker.publish("staking.other", "noise").await);
            }
        });

        let report = subscription.run(&mut session, cancel).await.unwrap();
        publisher.await.unwrap();
        assert_eq!(report.stop, StopReason::Cancelled);

        let seen = seen.lock().unwrap().clone();
        (seen, report.delivered)
    })
}

/// Everything queued when the token fires is still delivered, and nothing more
fn deliver_queued_then_cancel(payloads: Vec<String>) -> (Vec<String>, u64, bool) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let (transport, broker) = MockTransport::new();
        let mut session = Session::establish(transport).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            FnHandler(move |message: Message| {
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&message.payload).to_string());
                Ok(())
            })
        };

        let mut subscription = SubscriptionLoop::with_capacity(64);
        subscription
            .subscribe(&mut session, TOPIC, handler)
            .await
            .unwrap();

        for payload in payloads {
            assert!(broker.publish(TOPIC, payload).await);
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = subscription.run(&mut session, cancel).await.unwrap();
        assert_eq!(report.stop, StopReason::Cancelled);
        let late_accepted = broker.publish(TOPIC, "late").await;

        let seen = seen.lock().unwrap().clone();
        (seen, report.delivered, late_accepted)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_delivery_preserves_order(
        payloads in prop::collection::vec("[a-z0-9 ]{0,16}", 0..40),
        capacity in 1usize..8,
    ) {
        let (seen, delivered) = deliver_all(payloads.clone(), capacity);
        prop_assert_eq!(delivered as usize, payloads.len());
        prop_assert_eq!(seen, payloads);
    }

    #[test]
    fn prop_queued_messages_survive_cancellation(
        payloads in prop::collection::vec("[a-z0-9 ]{0,16}", 0..64),
    ) {
        let (seen, delivered, late_accepted) = deliver_queued_then_cancel(payloads.clone());
        prop_assert_eq!(delivered as usize, payloads.len());
        prop_assert_eq!(seen, payloads);
        prop_assert!(!late_accepted);
    }
}
