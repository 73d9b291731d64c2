//! Integration tests for the leader's bundle split loop.

mod common;

use anyhow::Result;
use bundle_load_manager::{BundleStats, LoadManagerConfig};
use common::{broker_snapshot, broker_snapshot_with_bundles, test_config, Harness};

const BUNDLE: &str = "ns/0x00000000_0x80000000";

fn bundle_stats(msg_rate_in: f64) -> BundleStats {
    BundleStats {
        msg_rate_in,
        msg_throughput_in: 1_000.0,
        topics: 5,
        ..Default::default()
    }
}

/// Runs two cycles: the first persists a quiet bundle, the second sees it exceed the rate limit.
async fn grow_bundle(harness: &Harness, conf: LoadManagerConfig) -> Result<()> {
    let b1 = harness
        .register_broker("b1", &broker_snapshot_with_bundles(20.0, &[BUNDLE], bundle_stats(10.0)))
        .await?;
    let _b2 = harness.register_broker("b2", &broker_snapshot(20.0)).await?;
    let manager = harness.manager("observer", conf)?;
    manager.update_all().await;
    manager.write_bundle_data_to_store().await;
    assert!(harness.resources().get_bundle_data(BUNDLE).await?.is_some());

    b1.update_value(&broker_snapshot_with_bundles(20.0, &[BUNDLE], bundle_stats(200_000.0)))
        .await?;
    manager.update_all().await;

    // the bundle is forgotten until its halves are reported
    assert!(manager.load_data().await.bundle(BUNDLE).is_none());
    Ok(())
}

/// **Test:** Oversized Bundle Is Split After Its Record Is Deleted
///
/// **Reason:** The durable history of the bundle being split must not survive
/// into the two new bundles, so it is deleted before the split is issued.
///
/// **Expectation:** Exactly one split command is sent, asking to unload the halves;
/// the bundle's record was already gone when it was sent, and the namespace's
/// bundle cache was invalidated.
#[tokio::test]
async fn test_bundle_exceeding_rate_is_split() -> Result<()> {
    let harness = Harness::new().await?;
    grow_bundle(&harness, test_config()).await?;

    let splits = harness.admin.splits.lock().unwrap().clone();
    assert_eq!(splits, vec![(BUNDLE.to_string(), true, false)]);
    assert!(harness
        .namespaces
        .invalidated
        .lock()
        .unwrap()
        .contains(&"ns".to_string()));
    assert!(harness.resources().get_bundle_data(BUNDLE).await?.is_none());
    Ok(())
}

/// **Test:** Split Without Unloading the Halves
///
/// **Reason:** Operators can keep split bundles on their current owner.
///
/// **Expectation:** The split command carries `unload = false`.
#[tokio::test]
async fn test_split_without_unload() -> Result<()> {
    let harness = Harness::new().await?;
    let mut conf = test_config();
    conf.split.auto_unload_split_bundles = false;
    grow_bundle(&harness, conf).await?;

    let splits = harness.admin.splits.lock().unwrap().clone();
    assert_eq!(splits, vec![(BUNDLE.to_string(), false, false)]);
    Ok(())
}

/// **Test:** Bundle That Can No Longer Be Split
///
/// **Reason:** A bundle whose key range is already minimal must be left alone.
///
/// **Expectation:** No split command is sent and the bundle stays in the load view.
#[tokio::test]
async fn test_unsplittable_bundle_is_left_alone() -> Result<()> {
    let harness = Harness::new().await?;
    harness.namespaces.set_splittable(false);
    let _b1 = harness
        .register_broker(
            "b1",
            &broker_snapshot_with_bundles(20.0, &[BUNDLE], bundle_stats(200_000.0)),
        )
        .await?;
    let _b2 = harness.register_broker("b2", &broker_snapshot(20.0)).await?;
    let manager = harness.manager("observer", test_config())?;
    manager.update_all().await;

    assert_eq!(manager.run_split_check().await, 0);
    assert!(harness.admin.splits.lock().unwrap().is_empty());
    assert!(manager.load_data().await.bundle(BUNDLE).is_some());
    Ok(())
}

/// **Test:** Followers and Lone Brokers Do Not Split
///
/// **Reason:** Splitting is a leader duty and pointless with a single broker.
///
/// **Expectation:** Neither a follower nor a leader that knows one broker issues splits.
#[tokio::test]
async fn test_split_requires_leader_and_peers() -> Result<()> {
    let harness = Harness::new().await?;
    let _b1 = harness
        .register_broker(
            "b1",
            &broker_snapshot_with_bundles(20.0, &[BUNDLE], bundle_stats(200_000.0)),
        )
        .await?;
    let manager = harness.manager("observer", test_config())?;

    manager.update_all().await;
    assert_eq!(manager.run_split_check().await, 0);

    let _b2 = harness.register_broker("b2", &broker_snapshot(20.0)).await?;
    harness.leader.set_leading(false);
    manager.update_all().await;
    assert_eq!(manager.run_split_check().await, 0);

    assert!(harness.admin.splits.lock().unwrap().is_empty());
    assert_eq!(manager.metrics().await.bundles_split_total, 0);
    Ok(())
}
