use super::*;
use crate::bus::MockBroker;
use std::time::Instant;

const TOPIC: &str = "truck-location";

fn route(n: usize) -> Vec<Coordinate> {
    (0..n)
        .map(|i| Coordinate::new(10.73 + i as f64 * 0.001, 59.92 - i as f64 * 0.001))
        .collect()
}

#[tokio::test]
async fn test_publish_acknowledges_every_coordinate() {
    let mut publisher = LocationPublisher::new(MockBroker::new());
    let interval = Duration::from_millis(10);

    let started = Instant::now();
    let summary = publisher.publish(route(3), TOPIC, interval).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.submitted, 3);
    assert_eq!(summary.acknowledged, 3);
    assert_eq!(summary.failed, 0);
    assert!(summary.failures.is_empty());
    assert!(!summary.cancelled);
    assert!(summary.is_complete_success());

    assert!(elapsed >= Duration::from_millis(20), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "elapsed {:?}", elapsed);

    let broker = publisher.client();
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(broker.submitted_count(), 3);
    assert_eq!(broker.poll_count(), 3);
    for pair in broker.submissions().windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= interval);
    }
}

#[tokio::test]
async fn test_publish_sends_wire_payloads_in_order() {
    let points = route(3);
    let mut publisher = LocationPublisher::new(MockBroker::new());

    publisher
        .publish(points.clone(), TOPIC, Duration::ZERO)
        .await
        .unwrap();

    let broker = publisher.into_inner();
    let sent: Vec<Coordinate> = broker
        .submissions()
        .iter()
        .map(|s| {
            assert_eq!(s.topic, TOPIC);
            LocationEvent::decode(&s.payload).unwrap().coordinate()
        })
        .collect();
    assert_eq!(sent, points);
}

#[tokio::test]
async fn test_publish_reports_failed_delivery() {
    let mut publisher = LocationPublisher::new(MockBroker::new().fail_delivery_of(1));

    let summary = publisher
        .publish(route(3), TOPIC, Duration::from_millis(1))
        .await
        .unwrap();

    assert_eq!(summary.acknowledged, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].index, 1);
    assert!(!summary.is_complete_success());
}

#[tokio::test]
async fn test_out_of_order_outcomes_keep_their_index() {
    let broker = MockBroker::new()
        .hold_until_drain()
        .acknowledge_in_reverse()
        .fail_delivery_of(0)
        .fail_delivery_of(3);
    let mut publisher = LocationPublisher::new(broker);

    let summary = publisher
        .publish(route(4), TOPIC, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(summary.acknowledged, 2);
    let indices: Vec<usize> = summary.failures.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 3]);
}

#[tokio::test]
async fn test_rejected_submission_is_reported_and_loop_continues() {
    let mut publisher = LocationPublisher::new(MockBroker::new().reject_submission_of(0));

    let summary = publisher
        .publish(route(3), TOPIC, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(summary.submitted, 3);
    assert_eq!(summary.acknowledged, 2);
    assert_eq!(summary.failures[0].index, 0);
    assert!(summary.failures[0].reason.contains("rejected"));
}

#[tokio::test]
async fn test_cancel_drains_submitted_messages_only() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let broker = MockBroker::new().hold_until_drain().cancel_after(2, cancel_tx);
    let mut publisher = LocationPublisher::new(broker);

    let summary = publisher
        .publish_until(route(5), TOPIC, Duration::from_millis(5), cancel_rx)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.submitted, 2);
    assert_eq!(summary.acknowledged, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(publisher.client().submitted_count(), 2);
    assert_eq!(publisher.client().pending_count(), 0);
}

#[tokio::test]
async fn test_cancel_interrupts_pause() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut publisher = LocationPublisher::new(MockBroker::new());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = cancel_tx.send(true);
    });

    let started = Instant::now();
    let summary = publisher
        .publish_until(route(3), TOPIC, Duration::from_secs(60), cancel_rx)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(summary.cancelled);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.acknowledged, 1);
}

#[tokio::test]
async fn test_cancelled_before_start_submits_nothing() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();
    let mut publisher = LocationPublisher::new(MockBroker::new());

    let summary = publisher
        .publish_until(route(3), TOPIC, Duration::ZERO, cancel_rx)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.submitted, 0);
    assert_eq!(publisher.client().submitted_count(), 0);
}

#[tokio::test]
async fn test_dropped_cancel_sender_does_not_stop_run() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    drop(cancel_tx);
    let mut publisher = LocationPublisher::new(MockBroker::new());

    let summary = publisher
        .publish_until(route(3), TOPIC, Duration::from_millis(1), cancel_rx)
        .await
        .unwrap();

    assert!(!summary.cancelled);
    assert_eq!(summary.acknowledged, 3);
}

#[tokio::test]
async fn test_unavailable_broker_submits_nothing() {
    let mut publisher = LocationPublisher::new(MockBroker::new().unavailable());

    let result = publisher.publish(route(3), TOPIC, Duration::ZERO).await;

    assert!(matches!(
        result,
        Err(PublishError::BrokerUnavailable { summary: None, .. })
    ));
    assert_eq!(publisher.client().submitted_count(), 0);
}

#[tokio::test]
async fn test_broker_lost_mid_run_drains_earlier_submissions() {
    let broker = MockBroker::new().hold_until_drain().unavailable_from(2);
    let mut publisher = LocationPublisher::new(broker);

    let result = publisher.publish(route(4), TOPIC, Duration::ZERO).await;

    match result {
        Err(PublishError::BrokerUnavailable {
            summary: Some(summary),
            ..
        }) => {
            assert_eq!(summary.submitted, 2);
            assert_eq!(summary.acknowledged, 2);
            assert_eq!(summary.undrained, None);
            assert!(summary.is_complete_success());
        }
        other => panic!("expected BrokerUnavailable with summary, got {:?}", other),
    }
    assert_eq!(publisher.client().connect_count(), 1);
    assert_eq!(publisher.client().submitted_count(), 2);
    assert_eq!(publisher.client().pending_count(), 0);
}

#[tokio::test]
async fn test_broker_lost_mid_run_reports_stalled_drain() {
    let broker = MockBroker::new()
        .hold_until_drain()
        .unavailable_from(1)
        .stall_drain();
    let mut publisher = LocationPublisher::new(broker);

    let result = publisher.publish(route(3), TOPIC, Duration::ZERO).await;

    let err = result.unwrap_err();
    assert!(matches!(err, PublishError::BrokerUnavailable { .. }));
    let summary = err.summary().expect("mid-run loss keeps the summary");
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.undrained, Some(1));
    assert_eq!(summary.unresolved(), 1);
}

#[tokio::test]
async fn test_broker_lost_after_acknowledgement_keeps_outcome() {
    let broker = MockBroker::new().unavailable_from(1).stall_drain();
    let mut publisher = LocationPublisher::new(broker);

    let result = publisher.publish(route(5), TOPIC, Duration::ZERO).await;

    match result {
        Err(PublishError::BrokerUnavailable {
            summary: Some(summary),
            ..
        }) => {
            assert_eq!(summary.submitted, 1);
            assert_eq!(summary.acknowledged, 1);
            assert_eq!(summary.undrained, Some(0));
        }
        other => panic!("expected BrokerUnavailable with summary, got {:?}", other),
    }
}

#[tokio::test]
async fn test_flush_timeout_keeps_partial_summary() {
    let broker = MockBroker::new().fail_delivery_of(0).stall_drain();
    let mut publisher =
        LocationPublisher::new(broker).with_flush_timeout(Duration::from_millis(10));

    let result = publisher.publish(route(2), TOPIC, Duration::ZERO).await;

    match result {
        Err(PublishError::FlushTimeout { pending, summary }) => {
            assert_eq!(pending, 0);
            assert_eq!(summary.submitted, 2);
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.acknowledged, 1);
        }
        other => panic!("expected FlushTimeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_flush_timeout_with_unresolved_messages() {
    let broker = MockBroker::new().hold_until_drain().stall_drain();
    let mut publisher = LocationPublisher::new(broker);

    let result = publisher.publish(route(3), TOPIC, Duration::ZERO).await;

    match result {
        Err(PublishError::FlushTimeout { pending, summary }) => {
            assert_eq!(pending, 3);
            assert_eq!(summary.undrained, Some(3));
            assert_eq!(summary.acknowledged, 0);
            assert_eq!(summary.unresolved(), 3);
        }
        other => panic!("expected FlushTimeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_finite_coordinate_fails_after_draining() {
    let points = vec![
        Coordinate::new(10.0, 59.0),
        Coordinate::new(f64::NAN, 59.0),
        Coordinate::new(11.0, 59.0),
    ];
    let mut publisher = LocationPublisher::new(MockBroker::new().hold_until_drain());

    let result = publisher.publish(points, TOPIC, Duration::ZERO).await;

    match result {
        Err(PublishError::Serialization { index, summary, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(summary.submitted, 1);
            assert_eq!(summary.acknowledged, 1);
        }
        other => panic!("expected Serialization, got {:?}", other),
    }
    assert_eq!(publisher.client().submitted_count(), 1);
    assert_eq!(publisher.client().pending_count(), 0);
}

#[tokio::test]
async fn test_publishing_twice_reuses_client() {
    let mut publisher = LocationPublisher::new(MockBroker::new());

    let first = publisher.publish(route(2), TOPIC, Duration::ZERO).await.unwrap();
    let second = publisher.publish(route(1), TOPIC, Duration::ZERO).await.unwrap();

    assert_eq!(first.acknowledged, 2);
    assert_eq!(second.acknowledged, 1);
    assert_eq!(publisher.client().submitted_count(), 3);
}

#[test]
fn test_summary_unresolved() {
    let summary = PublishSummary {
        submitted: 5,
        acknowledged: 2,
        failed: 1,
        ..PublishSummary::default()
    };
    assert_eq!(summary.unresolved(), 2);
    assert!(!summary.is_complete_success());
}

#[tokio::test]
async fn test_empty_sequence_is_a_successful_no_op() {
    let mut publisher = LocationPublisher::new(MockBroker::new());

    let summary = publisher
        .publish(Vec::new(), TOPIC, Duration::from_millis(10))
        .await
        .unwrap();

    assert_eq!(summary, PublishSummary::default());
    assert_eq!(publisher.client().connect_count(), 1);
    assert_eq!(publisher.client().submitted_count(), 0);
}
