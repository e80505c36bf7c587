//! Outbound sender pacing and partial-failure behavior.
mod common;

use std::time::Duration;
use tokio::time::Instant;

use common::MockTransport;
use roadmesh::relay::sender::OutboundSender;

const LONG: &str = "ACCIDENT: I-10 (East) Lanes: Left lane, Right shoulder @ Broadway Road, Tempe [12m ago]";

#[tokio::test(start_paused = true)]
async fn fragments_respect_minimum_gap() {
    let transport = MockTransport::new(None);
    let sender = OutboundSender::with_settings(transport.clone(), 40, 0, Duration::from_secs(2));

    let start = Instant::now();
    let report = sender.send(LONG).await;

    assert!(report.fragments >= 2, "expected a split, got {:?}", report);
    assert!(report.is_complete());
    let expected = Duration::from_secs(2) * (report.fragments as u32 - 1);
    assert!(start.elapsed() >= expected);
    assert!(transport.texts().iter().all(|t| t.len() <= 40));
}

#[tokio::test(start_paused = true)]
async fn gap_carries_across_calls_on_same_channel() {
    let transport = MockTransport::new(None);
    let sender = OutboundSender::with_settings(transport.clone(), 200, 0, Duration::from_secs(2));

    let start = Instant::now();
    sender.send("first").await;
    sender.send("second").await;

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(transport.texts(), vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn channels_are_paced_independently() {
    let transport = MockTransport::new(None);
    let sender = OutboundSender::with_settings(transport.clone(), 200, 0, Duration::from_secs(2));

    let start = Instant::now();
    sender.send_on("to zero", 0).await;
    sender.send_on("to one", 1).await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(
        transport.sent(),
        vec![("to zero".to_string(), 0), ("to one".to_string(), 1)]
    );
}

#[tokio::test]
async fn failed_fragment_does_not_stop_the_rest() {
    let transport = MockTransport::failing_first(1);
    let sender = OutboundSender::with_settings(transport.clone(), 40, 0, Duration::ZERO);

    let report = sender.send(LONG).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, report.fragments - 1);
    assert!(!report.is_complete());
    assert_eq!(transport.sent().len(), report.fragments - 1);
}

#[tokio::test]
async fn blank_text_sends_nothing() {
    let transport = MockTransport::new(None);
    let sender = OutboundSender::with_settings(transport.clone(), 200, 0, Duration::ZERO);

    let report = sender.send("   ").await;

    assert_eq!(report.fragments, 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn explicit_channel_is_used() {
    let transport = MockTransport::new(None);
    let sender = OutboundSender::with_settings(transport.clone(), 200, 0, Duration::ZERO);

    sender.send_on("hello ch3", 3).await;

    assert_eq!(transport.sent(), vec![("hello ch3".to_string(), 3)]);
    assert_eq!(sender.default_channel(), 0);
}
