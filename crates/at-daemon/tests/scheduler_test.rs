use std::sync::Arc;

use at_agents::worker_lifecycle::WorkerLifecycleController;
use at_core::cache::CacheDb;
use at_core::config::SchedulerConfig;
use at_core::types::{Bead, BeadType};
use at_daemon::scheduler::{CapacityScheduler, SchedulerError};
use at_session::pty_pool::PtyPool;

async fn scheduler_with(max_polecats: i32) -> (CapacityScheduler, Arc<CacheDb>) {
    let cache = Arc::new(CacheDb::new_in_memory().await.expect("in-memory cache"));
    let ptys = Arc::new(PtyPool::new(4));
    let lifecycle = Arc::new(WorkerLifecycleController::new(
        cache.clone(),
        ptys,
        "/tmp/at-daemon-scheduler-test",
    ));
    let config = SchedulerConfig {
        max_polecats,
        ..SchedulerConfig::default()
    };
    (
        CapacityScheduler::new(cache.clone(), lifecycle, config),
        cache,
    )
}

#[tokio::test]
async fn direct_mode_rejects_enqueue() {
    let (scheduler, cache) = scheduler_with(0).await;
    assert!(!scheduler.is_deferred());

    let bead = Bead::new("gt-1", "direct mode work", BeadType::Task);
    at_core::bead_store::BeadStoreAdapter::new(cache)
        .create(bead)
        .await
        .expect("create work bead");

    let err = scheduler.enqueue("gt-1", "rigA", None).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DirectMode));
}

#[tokio::test]
async fn deferred_mode_enqueues_and_lists() {
    let (scheduler, cache) = scheduler_with(2).await;
    assert!(scheduler.is_deferred());

    let bead = Bead::new("gt-2", "deferred work", BeadType::Task);
    at_core::bead_store::BeadStoreAdapter::new(cache)
        .create(bead)
        .await
        .expect("create work bead");

    let context_id = scheduler
        .enqueue("gt-2", "rigA", None)
        .await
        .expect("enqueue should succeed");
    assert!(context_id.starts_with("ctx-"));

    let status = scheduler.status().await.expect("status");
    assert_eq!(status.queued_total, 1);
    assert_eq!(status.queued_ready, 1);

    // Re-enqueueing the same work bead is idempotent.
    let again = scheduler
        .enqueue("gt-2", "rigA", None)
        .await
        .expect("re-enqueue should succeed");
    assert_eq!(again, context_id);

    let status = scheduler.status().await.expect("status");
    assert_eq!(status.queued_total, 1);
}

#[tokio::test]
async fn enqueue_rejects_cross_pool_bead() {
    let (scheduler, cache) = scheduler_with(2).await;

    let mut bead = Bead::new("gt-3", "pinned work", BeadType::Task);
    bead.rig = Some("rigA".into());
    at_core::bead_store::BeadStoreAdapter::new(cache)
        .create(bead)
        .await
        .expect("create work bead");

    let err = scheduler
        .enqueue("gt-3", "rigB", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::CrossPool { .. }));
}
