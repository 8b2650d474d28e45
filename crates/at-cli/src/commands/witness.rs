//! `at witness patrol <rig> [--interval D] [--debounce D]` (§4.6/§6) — run
//! the event-driven patrol loop in the foreground until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use at_daemon::patrol::PatrolRunner;
use at_harness::shutdown::ShutdownSignal;

use crate::context::CliContext;

pub async fn patrol(
    ctx: &CliContext,
    rig: &str,
    interval: Option<u64>,
    debounce: Option<u64>,
) -> anyhow::Result<()> {
    let mut patrol_config = ctx.config.patrol.clone();
    if let Some(interval) = interval {
        patrol_config.interval_secs = interval;
    }
    if let Some(debounce) = debounce {
        patrol_config.debounce_secs = debounce;
    }

    let lifecycle = Arc::new(ctx.lifecycle());
    let scheduler = Arc::new(at_daemon::scheduler::CapacityScheduler::new(
        ctx.cache.clone(),
        lifecycle.clone(),
        ctx.config.scheduler.clone(),
    ));
    let event_log_path = std::path::Path::new(&ctx.pool_dir())
        .join(".auto-tundra")
        .join(format!("{rig}-events.jsonl"));
    if let Some(parent) = event_log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !event_log_path.exists() {
        std::fs::write(&event_log_path, "")?;
    }

    let staleness = Duration::from_secs(ctx.config.agents.heartbeat_interval_secs * 2);
    let runner = PatrolRunner::new(
        ctx.cache.clone(),
        scheduler,
        lifecycle,
        event_log_path,
        patrol_config,
        staleness,
    );

    let shutdown = ShutdownSignal::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_shutdown.trigger();
        }
    });

    runner.run(rig, shutdown).await
}
