//! Tests for the node state cache and its refresh loop

use super::*;
use crate::metrics::{queries, MatchPolicy, ProbeConfig};
use crate::testing::FakeMetricsSource;
use std::time::Duration;
use tokio::sync::mpsc;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn seed_node(source: &FakeMetricsSource, instance: &str, cores: f64, busy: f64) {
    source.set(queries::CPU_CORES, instance, cores);
    source.set(queries::CPU_BUSY, instance, busy);
    source.set(queries::MEM_TOTAL, instance, 8.0 * GIB);
    source.set(queries::MEM_AVAILABLE, instance, 6.0 * GIB);
    source.set(queries::DISK_READ, instance, 1.0e6);
    source.set(queries::DISK_WRITE, instance, 1.0e6);
    source.set(queries::NET_UP, instance, 1.0e6);
    source.set(queries::NET_DOWN, instance, 1.0e6);
}

fn cache_with(source: Arc<FakeMetricsSource>, nodes: &[&str]) -> NodeStateCache {
    let probe = NodeProbe::new(source, ProbeConfig::default());
    NodeStateCache::new(probe, Arc::new(StaticNodeDirectory::new(nodes.iter().copied())))
}

/// Ticker stepped by sending on a channel
struct ManualTicker {
    rx: mpsc::Receiver<()>,
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::test]
async fn test_get_returns_none_before_refresh() {
    let source = Arc::new(FakeMetricsSource::new());
    let cache = cache_with(source, &["node-a"]);

    assert!(cache.get("node-a").await.is_none());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_refresh_all_populates_entries() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    seed_node(&source, "node-b:9100", 8.0, 2.0);
    let cache = cache_with(source, &["node-a", "node-b"]);

    let summary = cache.refresh_all().await;

    assert_eq!(summary.refreshed, 2);
    assert_eq!(summary.degraded, 0);
    assert_eq!(cache.len().await, 2);
    let a = cache.get("node-a").await.unwrap();
    assert_eq!(a.cpu_total, 4.0);
    assert_eq!(a.cpu_free, 3.0);
    assert_eq!(a.mem_free, 6.0 * GIB);
}

#[tokio::test]
async fn test_refresh_all_overwrites_wholesale() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let cache = cache_with(Arc::clone(&source), &["node-a"]);
    cache.refresh_all().await;

    source.set(queries::CPU_BUSY, "node-a:9100", 3.5);
    cache.refresh_all().await;

    assert_eq!(cache.get("node-a").await.unwrap().cpu_free, 0.5);
}

#[tokio::test]
async fn test_metrics_outage_degrades_to_fallback() {
    let source = Arc::new(FakeMetricsSource::new());
    source.fail_all(true);
    let health = HealthRegistry::new();
    let cache = cache_with(source, &["node-a"]).with_health(health.clone());

    let summary = cache.refresh_all().await;

    assert_eq!(summary.degraded, 1);
    let state = cache.get("node-a").await.unwrap();
    assert_eq!(state.cpu_total, 6.0);
    assert_eq!(state.cpu_free, 2.0);
    let component = health.component(components::METRICS_SOURCE).await.unwrap();
    assert_eq!(component.status, crate::health::ComponentStatus::Degraded);
}

#[tokio::test]
async fn test_clean_refresh_marks_metrics_source_healthy() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let health = HealthRegistry::new();
    health
        .set_degraded(components::METRICS_SOURCE, "stale")
        .await;
    let cache = cache_with(source, &["node-a"]).with_health(health.clone());

    cache.refresh_all().await;

    let component = health.component(components::METRICS_SOURCE).await.unwrap();
    assert_eq!(component.status, crate::health::ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_missing_node_keeps_last_value() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let cache = cache_with(Arc::clone(&source), &["node-a"]);
    cache.refresh_all().await;

    // metrics now only know about another node
    source.clear();
    seed_node(&source, "node-z:9100", 16.0, 0.0);
    let summary = cache.refresh_all().await;

    assert_eq!(summary.unknown, 1);
    assert_eq!(cache.get("node-a").await.unwrap().cpu_total, 4.0);
}

#[tokio::test]
async fn test_get_or_refresh_fetches_on_miss() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-c:9100", 2.0, 0.5);
    let cache = cache_with(source, &[]);

    let state = cache.get_or_refresh("node-c").await.unwrap();
    assert_eq!(state.cpu_free, 1.5);
    assert!(cache.get("node-c").await.is_some());
}

#[tokio::test]
async fn test_refresh_one_fails_for_unknown_node() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let cache = cache_with(source, &[]);

    let err = cache.refresh_one("ghost").await.unwrap_err();
    assert!(matches!(err, CacheError::NodeUnknown(ref n) if n == "ghost"));
    assert!(cache.get("ghost").await.is_none());
}

#[tokio::test]
async fn test_refresh_one_borrows_under_any_available() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let config = ProbeConfig {
        match_policy: MatchPolicy::AnyAvailable,
        ..Default::default()
    };
    let probe = NodeProbe::new(source, config);
    let cache = NodeStateCache::new(probe, Arc::new(StaticNodeDirectory::default()));

    let state = cache.refresh_one("ghost").await.unwrap();
    assert_eq!(state.cpu_total, 4.0);
}

#[tokio::test]
async fn test_store_clamps_free_to_total() {
    let source = Arc::new(FakeMetricsSource::new());
    let cache = cache_with(source, &[]);

    let state = NodeResourceState {
        cpu_total: 2.0,
        cpu_free: 5.0,
        ..Default::default()
    };
    cache.store("node-a", state, Vec::new()).await;

    assert_eq!(cache.get("node-a").await.unwrap().cpu_free, 2.0);
}

struct FailingDirectory;

#[async_trait]
impl NodeDirectory for FailingDirectory {
    async fn list_nodes(&self) -> Result<Vec<String>, CacheError> {
        Err(CacheError::Directory("api down".to_string()))
    }
}

#[tokio::test]
async fn test_directory_failure_reprobes_cached_nodes() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let probe = NodeProbe::new(source.clone(), ProbeConfig::default());
    let cache = NodeStateCache::new(probe, Arc::new(FailingDirectory));
    cache.refresh_one("node-a").await.unwrap();

    source.set(queries::CPU_BUSY, "node-a:9100", 4.0);
    let summary = cache.refresh_all().await;

    assert_eq!(summary.refreshed, 1);
    assert_eq!(cache.get("node-a").await.unwrap().cpu_free, 0.0);
}

#[tokio::test]
async fn test_concurrent_readers_see_whole_entries() {
    let source = Arc::new(FakeMetricsSource::new());
    let cache = Arc::new(cache_with(source, &[]));

    let writer = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for i in 0..200 {
                let v = i as f64;
                let state = NodeResourceState {
                    cpu_total: v,
                    cpu_free: v,
                    mem_total: v,
                    mem_free: v,
                    ..Default::default()
                };
                cache.store("node-a", state, Vec::new()).await;
                tokio::task::yield_now().await;
            }
        })
    };

    let reader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for _ in 0..200 {
                if let Some(state) = cache.get("node-a").await {
                    assert_eq!(state.cpu_total, state.mem_total);
                    assert_eq!(state.cpu_free, state.mem_free);
                }
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}

#[tokio::test]
async fn test_refresh_loop_runs_on_tick_and_closes() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let cache = Arc::new(cache_with(Arc::clone(&source), &["node-a"]));

    let (tx, rx) = mpsc::channel(4);
    let handle = cache.start_refresh(Box::new(ManualTicker { rx }));

    assert!(cache.get("node-a").await.is_none());
    tx.send(()).await.unwrap();

    let populated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if cache.get("node-a").await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(populated.is_ok());

    handle.close().await;
    let queries_after_close = source.query_count();
    let _ = tx.send(()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.query_count(), queries_after_close);
}

#[tokio::test(start_paused = true)]
async fn test_interval_ticker_drives_refresh() {
    let source = Arc::new(FakeMetricsSource::new());
    seed_node(&source, "node-a:9100", 4.0, 1.0);
    let cache = Arc::new(cache_with(Arc::clone(&source), &["node-a"]));

    let handle = cache.start_refresh(Box::new(IntervalTicker::new(Duration::from_secs(30))));

    // first tick fires immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    let after_first = source.query_count();
    assert!(after_first > 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(source.query_count() > after_first);

    handle.close().await;
}
