//! Integration tests for local load reporting.

mod common;

use anyhow::Result;
use bundle_load_manager::{LoadManagerError, ModularLoadManager};
use bundle_metadata_store::SessionEvent;
use common::{stats, test_config, Harness, StatsFailure};
use tokio::time::{sleep, Duration};

/// Publishes with `force` until the result equals `expected`, for at most one second.
async fn wait_for_publish_result(manager: &ModularLoadManager, expected: bool) -> Result<bool> {
    for _ in 0..50 {
        if manager.publish_if_due(true).await? == expected {
            return Ok(true);
        }
        sleep(Duration::from_millis(20)).await;
    }
    Ok(false)
}

/// **Test:** Publishing Before Start
///
/// **Reason:** The snapshot lives under a lock acquired by `start`; writing it
/// earlier has nowhere to go.
///
/// **Expectation:** A forced publish fails with `NotStarted`.
#[tokio::test]
async fn test_publish_requires_start() -> Result<()> {
    let harness = Harness::new().await?;
    let manager = harness.manager("b1", test_config())?;

    let err = manager.publish_if_due(true).await.unwrap_err();
    assert!(matches!(err, LoadManagerError::NotStarted));
    Ok(())
}

/// **Test:** Publish Only on Significant Change
///
/// **Reason:** Every publish is a store write observed by every broker, so an
/// unchanged snapshot must not be republished.
///
/// **Expectation:** The first publish goes out, an identical one is suppressed, and
/// gaining a bundle publishes again with the bundle visible to other brokers.
#[tokio::test]
async fn test_publish_on_significant_change() -> Result<()> {
    let harness = Harness::new().await?;
    harness.host_usage.set_percent(20.0);
    let manager = harness.manager("b1", test_config())?;
    manager.start().await?;

    assert!(manager.publish_if_due(false).await?);
    assert!(!manager.publish_if_due(false).await?);

    harness.bundle_stats.set("ns/0x00000000_0xffffffff", stats(50.0, 5_000.0));
    assert!(manager.publish_if_due(false).await?);

    let published = manager
        .get_broker_local_data("b1")
        .await
        .expect("snapshot published");
    assert!(published.bundles.contains("ns/0x00000000_0xffffffff"));
    assert_eq!(published.num_bundles, 1);
    assert_eq!(published.msg_rate_in, 50.0);
    assert!(published.last_update > 0);
    assert!(published.last_bundle_gains.contains("ns/0x00000000_0xffffffff"));

    let metrics = manager.metrics().await;
    assert_eq!(metrics.broker_id, "b1");
    assert_eq!(metrics.cpu_usage, 20.0);
    assert!(metrics.bundles.is_empty());

    manager.stop().await;
    Ok(())
}

/// **Test:** Lost Session Pauses Publishing
///
/// **Reason:** While the metadata session is down the snapshot cannot be trusted to
/// land, so publishing waits for the session to come back.
///
/// **Expectation:** Forced publishes are skipped after a connection loss and resume
/// after reconnection.
#[tokio::test]
async fn test_session_loss_pauses_publishing() -> Result<()> {
    let harness = Harness::new().await?;
    let manager = harness.manager("b1", test_config())?;
    manager.start().await?;
    assert!(manager.publish_if_due(true).await?);

    harness.memory.set_session_event(SessionEvent::ConnectionLost);
    assert!(wait_for_publish_result(&manager, false).await?);

    harness.memory.set_session_event(SessionEvent::Reconnected);
    assert!(wait_for_publish_result(&manager, true).await?);

    manager.stop().await;
    Ok(())
}

/// **Test:** Bundle Metrics Exposure
///
/// **Reason:** Per-bundle metrics are opt-in because of their cardinality.
///
/// **Expectation:** With the option enabled the metrics snapshot lists every bundle
/// served by this broker.
#[tokio::test]
async fn test_bundle_metrics_are_opt_in() -> Result<()> {
    let harness = Harness::new().await?;
    harness.bundle_stats.set("ns/a", stats(1.0, 10.0));
    harness.bundle_stats.set("ns/b", stats(2.0, 20.0));
    let mut conf = test_config();
    conf.expose_bundles_metrics = true;
    let manager = harness.manager("b1", conf)?;

    manager.update_local_broker_data().await?;
    let metrics = manager.metrics().await;
    let bundles: Vec<&str> = metrics.bundles.iter().map(|b| b.bundle.as_str()).collect();
    assert_eq!(bundles, vec!["ns/a", "ns/b"]);
    assert_eq!(metrics.bundles[1].msg_rate_in, 2.0);
    Ok(())
}

/// **Test:** Sampling Errors
///
/// **Reason:** A transient sampling failure must not stop reporting, but a concurrent
/// modification of the stats source is the caller's to handle.
///
/// **Expectation:** A concurrent modification is returned as an error; any other
/// failure is logged and the last snapshot is kept.
#[tokio::test]
async fn test_concurrent_modification_is_raised() -> Result<()> {
    let harness = Harness::new().await?;
    harness.bundle_stats.set("ns/a", stats(1.0, 10.0));
    let manager = harness.manager("b1", test_config())?;
    manager.update_local_broker_data().await?;

    harness
        .bundle_stats
        .fail_with(Some(StatsFailure::ConcurrentModification));
    let err = manager.update_local_broker_data().await.unwrap_err();
    assert!(matches!(err, LoadManagerError::ConcurrentModification(_)));

    harness.bundle_stats.fail_with(Some(StatsFailure::Unavailable));
    let kept = manager.update_local_broker_data().await?;
    assert!(kept.bundles.contains("ns/a"));
    assert_eq!(kept.msg_rate_in, 1.0);
    Ok(())
}
