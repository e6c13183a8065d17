//! Delivery guarantees: recovery, redelivery, failure containment

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drain, quick_retry, topic, wait_until, Harness, CONSUMER, GROUP};
use sensor_stream_core::logic::consumer::ConsumerLoop;
use sensor_stream_core::logic::detector::AnomalyDetector;
use sensor_stream_core::logic::retry::RetryPolicy;
use sensor_stream_core::store::memory::{LogEvent, PullKind};
use sensor_stream_core::store::{Cursor, GroupCreation, Sample, StartPosition, StreamLog};
use tokio_test::{assert_err, assert_ok};

/// Deliver everything on `device`'s topic to the harness consumer without acking
async fn claim(h: &Harness, device: &str) -> usize {
    let cursors = vec![(topic(device), Cursor::New)];
    h.log
        .pull(GROUP, CONSUMER, &cursors, 1_000, Duration::ZERO)
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_existing_group_is_not_an_error() {
    let h = Harness::new();
    let created = assert_ok!(
        h.log
            .create_group(&topic("01"), GROUP, StartPosition::Earliest)
            .await
    );
    assert_eq!(created, GroupCreation::Created);

    let consumer = h.detector(&["01"], quick_retry());
    assert_ok!(consumer.initialize().await);
    assert_eq!(assert_ok!(consumer.recover().await), 0);
}

#[tokio::test]
async fn test_group_starts_at_beginning_of_log() {
    let h = Harness::new();
    h.publish("01", 1.0, 20.0).await;
    h.publish("01", 2.0, 21.0).await;

    let consumer = h.detector(&["01"], quick_retry());
    assert_ok!(consumer.initialize().await);
    drain(&consumer).await;

    assert_eq!(h.series.samples("device:01:temp").len(), 2);
}

#[tokio::test]
async fn test_crash_between_persist_and_ack_redelivers_once() {
    let h = Harness::new();
    h.set_params(3, 2.0).await;

    // First process: acks fail once the spike arrives, as if it died before acking
    let first = h.detector(&["01"], RetryPolicy::fixed(Duration::from_millis(1), Some(1)));
    assert_ok!(first.initialize().await);
    h.publish_history("01", &[20.0, 20.0, 20.0]).await;
    drain(&first).await;

    h.publish("01", 4.0, 30.0).await;
    h.log.fail_next_acks(1);
    drain(&first).await;

    assert_eq!(first.stats().alerts, 1);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 1);
    assert_eq!(h.series.samples("device:01:temp").len(), 4);

    // Restart: the pending spike comes back exactly once
    let second = h.detector(&["01"], quick_retry());
    assert_ok!(second.initialize().await);
    assert_eq!(assert_ok!(second.recover().await), 1);
    assert_eq!(assert_ok!(second.recover().await), 0);

    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 0);
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(h.series.samples("device:01:temp").len(), 4);
    assert_eq!(second.stats().alerts, 0);
}

#[tokio::test]
async fn test_recovery_completes_before_live_work() {
    let h = Harness::new();
    let consumer = Arc::new(h.detector(&["01", "02"], quick_retry()));
    assert_ok!(consumer.initialize().await);

    // P: delivered to us before a crash
    for t in 1..=3 {
        h.publish("01", t as f64, 20.0).await;
        h.publish("02", t as f64, 30.0).await;
    }
    assert_eq!(claim(&h, "01").await, 3);
    assert_eq!(claim(&h, "02").await, 3);

    // Q: arrived while we were down
    for t in 4..=5 {
        h.publish("01", t as f64, 20.0).await;
        h.publish("02", t as f64, 30.0).await;
    }

    let offset = h.log.history().len();
    let runner = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };

    for _ in 0..400 {
        if consumer.stats().acked == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.shutdown.shutdown();
    let stats = runner.await.unwrap();

    assert_eq!(stats.acked, 10);
    assert_eq!(stats.recovered, 6);

    let history: Vec<LogEvent> = h.log.history().into_iter().skip(offset).collect();
    let first_new_pull = history
        .iter()
        .position(|e| matches!(e, LogEvent::Pull { kind: PullKind::New, .. }))
        .unwrap();
    let acks_before_live = history[..first_new_pull]
        .iter()
        .filter(|e| matches!(e, LogEvent::Ack { .. }))
        .count();
    assert_eq!(acks_before_live, 6);

    // Per-device writes stay chronological
    for key in ["device:01:temp", "device:02:temp"] {
        let stamps: Vec<i64> = h.series.samples(key).iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![1_000, 2_000, 3_000, 4_000, 5_000]);
    }
}

#[tokio::test]
async fn test_malformed_entry_is_left_unacknowledged() {
    let h = Harness::new();
    let consumer = h.detector(&["01"], quick_retry());
    assert_ok!(consumer.initialize().await);

    h.publish_raw(
        "01",
        &[("timestamp", "1".to_string()), ("temperature_c", "hot".to_string())],
    )
    .await;
    h.publish("01", 2.0, 20.0).await;
    drain(&consumer).await;

    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 1);
    assert_eq!(consumer.stats().failed, 1);
    assert_eq!(consumer.stats().acked, 1);
    assert_eq!(h.series.samples("device:01:temp"), vec![Sample::new(2_000, 20.0)]);

    // Next recovery pass visits it once more and moves on
    assert_eq!(assert_ok!(consumer.recover().await), 0);
    assert_eq!(consumer.stats().failed, 2);
}

#[tokio::test]
async fn test_store_outage_is_ridden_out() {
    let h = Harness::new();
    let consumer = h.detector(&["01"], quick_retry());
    assert_ok!(consumer.initialize().await);

    h.publish("01", 1.0, 20.0).await;
    h.log.fail_next_pulls(3);
    h.series.fail_next_appends(2);
    drain(&consumer).await;

    assert_eq!(h.series.samples("device:01:temp").len(), 1);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 0);
}

#[tokio::test]
async fn test_bounded_retry_surfaces_outage() {
    let h = Harness::new();
    let consumer = h.detector(&["01"], RetryPolicy::fixed(Duration::from_millis(1), Some(2)));
    assert_ok!(consumer.initialize().await);

    h.log.fail_next_pulls(5);
    assert_err!(consumer.poll_live().await);
}

#[tokio::test]
async fn test_periodic_recovery_retries_failed_entries() {
    let h = Harness::new();
    let mut config = h.config(&["01"]);
    config.recovery_interval = Some(Duration::from_millis(20));
    let detector = AnomalyDetector::new(
        h.series.clone(),
        h.params.clone(),
        h.sink.clone(),
        1_000,
        RetryPolicy::fixed(Duration::from_millis(1), Some(1)),
        h.shutdown.clone(),
    );
    let consumer = Arc::new(ConsumerLoop::new(
        h.log.clone(),
        detector,
        config,
        quick_retry(),
        h.shutdown.clone(),
    ));
    assert_ok!(consumer.initialize().await);

    // The live attempt's persist fails and the entry stays pending
    h.publish("01", 1.0, 20.0).await;
    h.series.fail_next_appends(1);
    let runner = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };

    for _ in 0..400 {
        if consumer.stats().recovery_passes >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.shutdown.shutdown();
    let stats = runner.await.unwrap();

    assert!(stats.recovery_passes >= 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.recovered, 1);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 0);
    assert_eq!(h.series.samples("device:01:temp").len(), 1);
}

#[tokio::test]
async fn test_run_exits_on_shutdown_when_idle() {
    let h = Harness::new();
    let consumer = Arc::new(h.detector(&["01"], quick_retry()));

    let runner = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.shutdown.shutdown();

    let stats = runner.await.unwrap();
    assert_eq!(stats.processed, 0);
    assert!(h.log.group_exists(&topic("01"), GROUP));
}

#[tokio::test]
async fn test_undecodable_pending_entry_does_not_block_start_up() {
    let h = Harness::new();
    let consumer = Arc::new(h.detector(&["01"], quick_retry()));
    assert_ok!(consumer.initialize().await);

    // Left pending by a previous run: a corrupt reading, then a good one
    h.publish_raw(
        "01",
        &[("timestamp", "1".to_string()), ("temperature_c", "\u{fffd}\u{fffd}".to_string())],
    )
    .await;
    h.publish("01", 2.0, 20.0).await;
    assert_eq!(claim(&h, "01").await, 2);
    h.publish("01", 3.0, 20.5).await;

    let runner = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };
    wait_until(|| consumer.stats().acked == 2).await;
    h.shutdown.shutdown();
    let stats = runner.await.unwrap();

    assert_eq!(stats.acked, 2);
    assert_eq!(stats.recovered, 1);
    assert!(stats.failed >= 1);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 1);
    assert_eq!(
        h.series.samples("device:01:temp"),
        vec![Sample::new(2_000, 20.0), Sample::new(3_000, 20.5)]
    );
}

#[tokio::test]
async fn test_shutdown_during_baseline_read_leaves_entry_pending() {
    let h = Harness::new();
    h.set_params(3, 2.0).await;
    let consumer = Arc::new(h.detector(&["01"], quick_retry()));
    assert_ok!(consumer.initialize().await);
    h.publish_history("01", &[20.0, 20.0, 20.0]).await;
    drain(&consumer).await;

    // History reads fail until shutdown interrupts the retry
    h.series.fail_ranges(true);
    h.publish("01", 4.0, 30.0).await;
    let runner = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };
    wait_until(|| h.log.pending_count(&topic("01"), GROUP) == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.shutdown.shutdown();
    let stats = runner.await.unwrap();

    assert_eq!(stats.acked, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 1);
    assert_eq!(h.series.samples("device:01:temp").len(), 3);
    assert!(h.alerts().is_empty());

    // Next run judges it against the real baseline
    h.series.fail_ranges(false);
    let next = h.restart();
    let second = next.detector(&["01"], quick_retry());
    assert_ok!(second.initialize().await);
    assert_eq!(assert_ok!(second.recover().await), 1);

    assert_eq!(h.alerts().len(), 1);
    assert_eq!(h.series.samples("device:01:temp").len(), 4);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 0);
}

#[tokio::test]
async fn test_shutdown_after_alert_redelivers_without_second_alert() {
    let h = Harness::new();
    h.set_params(3, 2.0).await;
    let consumer = Arc::new(h.detector(&["01"], quick_retry()));
    assert_ok!(consumer.initialize().await);
    h.publish_history("01", &[20.0, 20.0, 20.0]).await;
    drain(&consumer).await;

    // The alert goes out, then persisting the spike keeps failing
    h.series.fail_next_appends(1_000_000);
    h.publish("01", 4.0, 30.0).await;
    let runner = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };
    wait_until(|| h.alerts().len() == 1).await;
    h.shutdown.shutdown();
    let stats = runner.await.unwrap();

    assert_eq!(stats.acked, 3);
    assert_eq!(stats.alerts, 0);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 1);
    assert_eq!(h.series.samples("device:01:temp").len(), 3);
    assert_eq!(h.alerts().len(), 1);

    h.series.fail_next_appends(0);
    let next = h.restart();
    let second = next.detector(&["01"], quick_retry());
    assert_ok!(second.initialize().await);
    assert_eq!(assert_ok!(second.recover().await), 1);

    assert_eq!(second.stats().alerts, 0);
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(h.series.samples("device:01:temp").len(), 4);
    assert_eq!(h.log.pending_count(&topic("01"), GROUP), 0);
}
