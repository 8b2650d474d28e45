//! The town's background process: wires the capacity scheduler (§4.3) and
//! the event-driven patrol loop (§4.6) together for one rig and runs them
//! until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use at_agents::worker_lifecycle::WorkerLifecycleController;
use at_core::cache::CacheDb;
use at_core::config::Config;
use at_session::pty_pool::PtyPool;
use tracing::info;

use at_harness::shutdown::ShutdownSignal;

use crate::kpi::KpiCollector;
use crate::patrol::PatrolRunner;
use crate::scheduler::CapacityScheduler;

/// Intervals for the daemon's own loops (KPI snapshotting); the scheduler's
/// dispatch cadence and the patrol loop's own timers are configured
/// separately from `Config::scheduler`/`Config::patrol`.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    pub kpi_secs: u64,
    pub dispatch_secs: u64,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self {
            kpi_secs: 300,
            dispatch_secs: 15,
        }
    }
}

/// One rig's long-lived background process.
pub struct Daemon {
    config: Config,
    rig: String,
    default_branch: String,
    cache: Arc<CacheDb>,
    scheduler: Arc<CapacityScheduler>,
    lifecycle: Arc<WorkerLifecycleController>,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
}

impl Daemon {
    pub fn with_cache(config: Config, rig: impl Into<String>, cache: Arc<CacheDb>) -> Self {
        let rig = rig.into();
        let pool_dir = config
            .general
            .workspace_root
            .clone()
            .unwrap_or_else(|| ".".to_string());
        let ptys = Arc::new(PtyPool::new(config.agents.max_concurrent as usize));
        let lifecycle = Arc::new(WorkerLifecycleController::new(
            cache.clone(),
            ptys,
            pool_dir,
        ));
        let scheduler = Arc::new(CapacityScheduler::new(
            cache.clone(),
            lifecycle.clone(),
            config.scheduler.clone(),
        ));
        Self {
            default_branch: "main".to_string(),
            intervals: DaemonIntervals::default(),
            shutdown: ShutdownSignal::new(),
            config,
            rig,
            cache,
            scheduler,
            lifecycle,
        }
    }

    pub async fn new(config: Config, rig: impl Into<String>) -> Result<Self> {
        let cache = CacheDb::new(&config.cache.path)
            .await
            .context("failed to open cache database")?;
        Ok(Self::with_cache(config, rig, Arc::new(cache)))
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn set_intervals(&mut self, intervals: DaemonIntervals) {
        self.intervals = intervals;
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<CapacityScheduler> {
        &self.scheduler
    }

    fn event_log_path(&self) -> std::path::PathBuf {
        std::path::Path::new(
            self.config
                .general
                .workspace_root
                .as_deref()
                .unwrap_or("."),
        )
        .join(".auto-tundra")
        .join(format!("{}-events.jsonl", self.rig))
    }

    /// Run the daemon until shutdown: the patrol loop's own reactor/timer
    /// loop plus a dispatch timer and a KPI timer, all cooperative on the
    /// shared shutdown signal.
    pub async fn run(&self) -> Result<()> {
        info!(
            rig = %self.rig,
            kpi_secs = self.intervals.kpi_secs,
            dispatch_secs = self.intervals.dispatch_secs,
            "daemon starting"
        );

        let patrol = PatrolRunner::new(
            self.cache.clone(),
            self.scheduler.clone(),
            self.lifecycle.clone(),
            self.event_log_path(),
            self.config.patrol.clone(),
            Duration::from_secs(self.config.agents.heartbeat_interval_secs * 2),
        );

        let patrol_shutdown = self.shutdown.clone();
        let rig = self.rig.clone();
        let patrol_handle = tokio::spawn(async move { patrol.run(&rig, patrol_shutdown).await });

        let kpi_collector = KpiCollector::new();
        let mut kpi_interval = tokio::time::interval(Duration::from_secs(self.intervals.kpi_secs));
        let mut dispatch_interval =
            tokio::time::interval(Duration::from_secs(self.intervals.dispatch_secs));
        kpi_interval.tick().await;
        dispatch_interval.tick().await;

        let mut shutdown_rx = self.shutdown.subscribe();
        let runtime = at_agents::worker_lifecycle::ShellAgentRuntime {
            command: self.config.agents.launch_command.clone(),
            args: self.config.agents.launch_args.clone(),
        };

        loop {
            tokio::select! {
                _ = dispatch_interval.tick() => {
                    if self.scheduler.is_deferred() {
                        match self.scheduler.dispatch(&self.default_branch, &runtime).await {
                            Ok(report) => info!(rig = %self.rig, ?report, "dispatch pass complete"),
                            Err(e) => tracing::error!(rig = %self.rig, error = %e, "dispatch pass failed"),
                        }
                    }
                }
                _ = kpi_interval.tick() => {
                    match kpi_collector.collect_snapshot(&self.cache).await {
                        Ok(_snapshot) => {}
                        Err(e) => tracing::error!(error = %e, "kpi snapshot failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(rig = %self.rig, "shutdown signal received, stopping daemon loops");
                    break;
                }
            }
        }

        patrol_handle.abort();
        info!(rig = %self.rig, "daemon stopped");
        Ok(())
    }
}
