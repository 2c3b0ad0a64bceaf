mod support;

use std::collections::HashSet;

use metrics_util::debugging::DebuggingRecorder;
use offgrid::cache::{CacheConfig, Manifest, NamespaceId, NamespaceManager, WarmUpController};
use offgrid::infra::telemetry;
use serial_test::serial;
use support::{Harness, get, origin};

#[tokio::test]
#[serial]
async fn strategy_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let config = CacheConfig {
        media_max_entries: 1,
        ..CacheConfig::default()
    };
    let harness = Harness::new(config);

    // request + eviction
    for path in ["/a.png", "/b.png"] {
        harness.executor.handle(&get(path)).await.unwrap();
        harness.settle().await;
    }

    // network failure + cache miss
    harness.fetcher.set_offline(true);
    assert!(harness.executor.handle(&get("/api/none")).await.is_err());

    // warm-up timing
    harness.fetcher.set_offline(false);
    let controller = WarmUpController::new(harness.store.clone(), harness.fetcher.clone(), origin());
    controller
        .warm_up(
            &NamespaceId::from_raw("offgrid-precache-v1"),
            &Manifest::new(["/"]),
        )
        .await
        .unwrap();

    // namespace removal
    let manager = NamespaceManager::new(
        harness.store.clone(),
        CacheConfig::default().with_tags("v2", "v2").namespaces(),
    );
    manager.activate().await.unwrap();

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "offgrid_request_total",
        "offgrid_network_failure_total",
        "offgrid_cache_miss_total",
        "offgrid_cache_evict_total",
        "offgrid_namespace_removed_total",
        "offgrid_warmup_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
