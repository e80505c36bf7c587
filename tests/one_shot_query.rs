//! One-shot query mode: uncapped output, batch dedup, radio delivery.
mod common;

use std::time::Duration;

use common::{accident, roadwork, test_config, FixedGeocoder, MockTraffic, MockTransport};
use roadmesh::relay::commands::CommandKind;
use roadmesh::relay::query::{collect_messages, run_query, QueryOutput};
use roadmesh::relay::sender::OutboundSender;

#[tokio::test]
async fn query_is_not_capped() {
    let config = test_config();
    let traffic = MockTraffic {
        accidents: (0..6)
            .map(|i| accident(&i.to_string(), &format!("SR-{}", 80 + i), "South"))
            .collect(),
        ..Default::default()
    };
    let geocoder = FixedGeocoder::new("Mesa");

    let (messages, report) = collect_messages(
        &config,
        &traffic,
        &*geocoder,
        CommandKind::Accidents,
        "all",
    )
    .await
    .unwrap();

    assert_eq!(messages.len(), 6);
    assert_eq!(report.fetched, 6);
    assert_eq!(report.emitted, 6);
    assert_eq!(report.duplicates, 0);
}

#[tokio::test]
async fn query_reports_duplicates() {
    let config = test_config();
    let traffic = MockTraffic {
        accidents: vec![
            accident("1", "I-10", "East"),
            accident("2", "I-10", "East"),
            accident("3", "I-17", "North"),
        ],
        ..Default::default()
    };

    let (messages, report) = collect_messages(
        &config,
        &traffic,
        &*FixedGeocoder::new("Phoenix"),
        CommandKind::Accidents,
        "phoenix",
    )
    .await
    .unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(report.duplicates, 1);
}

#[tokio::test]
async fn empty_results_use_plain_wording() {
    let config = test_config();
    let traffic = MockTraffic {
        events: vec![accident("1", "I-10", "East")],
        ..Default::default()
    };
    let geocoder = FixedGeocoder::new("x");

    let (accidents, _) = collect_messages(&config, &traffic, &*geocoder, CommandKind::Accidents, "Yuma")
        .await
        .unwrap();
    let (events, _) = collect_messages(&config, &traffic, &*geocoder, CommandKind::Events, "phoenix")
        .await
        .unwrap();
    let (alerts, _) = collect_messages(&config, &traffic, &*geocoder, CommandKind::Alerts, "all")
        .await
        .unwrap();

    assert_eq!(accidents, vec!["No accidents found".to_string()]);
    assert_eq!(events, vec!["No events found".to_string()]);
    assert_eq!(alerts, vec!["No alerts found".to_string()]);
}

#[tokio::test]
async fn send_mode_puts_each_message_on_air() {
    let config = test_config();
    let traffic = MockTraffic {
        events: vec![roadwork("1", "SR-51"), roadwork("2", "US-60")],
        ..Default::default()
    };
    let transport = MockTransport::new(None);
    let sender = OutboundSender::with_settings(transport.clone(), 200, 1, Duration::ZERO);

    let report = run_query(
        &config,
        &traffic,
        &*FixedGeocoder::new("x"),
        CommandKind::Events,
        "phoenix",
        QueryOutput::Radio(&sender),
    )
    .await
    .unwrap();

    assert_eq!(report.emitted, 2);
    assert_eq!(
        transport.sent(),
        vec![
            ("ROADWORK: SR-51 (North)".to_string(), 1),
            ("ROADWORK: US-60 (North)".to_string(), 1),
        ]
    );
}
