//! Shared setup for every subcommand: load config, open the same cache
//! database the daemon writes to, and build the library-level handles each
//! command needs. There is no HTTP surface here — the CLI is another local
//! client of the same `CacheDb` file.

use std::sync::Arc;

use at_agents::worker_lifecycle::WorkerLifecycleController;
use at_core::bead_store::BeadStoreAdapter;
use at_core::cache::CacheDb;
use at_core::config::Config;
use at_daemon::scheduler::CapacityScheduler;
use at_session::pty_pool::PtyPool;

pub struct CliContext {
    pub config: Config,
    pub cache: Arc<CacheDb>,
    pub bead_store: BeadStoreAdapter,
}

impl CliContext {
    pub async fn load() -> anyhow::Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let mut config = Config::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            Config::default()
        });
        if config.cache.path.starts_with("~/") {
            config.cache.path = config.cache.path.replacen('~', &home, 1);
        }
        let cache = Arc::new(CacheDb::new(&config.cache.path).await?);
        let bead_store = BeadStoreAdapter::new(cache.clone())
            .with_retry_backoff_secs(config.scheduler.retry_backoff_secs);
        Ok(Self {
            config,
            cache,
            bead_store,
        })
    }

    /// `workspace_root` is the pool directory every rig's polecat worktrees
    /// and the lifecycle controller's PTY pool are rooted under — the same
    /// path `at-daemon::daemon::Daemon` builds its controller from.
    pub fn pool_dir(&self) -> String {
        self.config
            .general
            .workspace_root
            .clone()
            .unwrap_or_else(|| ".".to_string())
    }

    pub fn lifecycle(&self) -> WorkerLifecycleController {
        let ptys = Arc::new(PtyPool::new(self.config.agents.max_concurrent as usize));
        WorkerLifecycleController::new(self.cache.clone(), ptys, self.pool_dir())
    }

    pub fn scheduler(&self) -> CapacityScheduler {
        CapacityScheduler::new(
            self.cache.clone(),
            Arc::new(self.lifecycle()),
            self.config.scheduler.clone(),
        )
    }
}

/// Split a polecat address `<rig>/<name>` into its parts.
pub fn split_addr(addr: &str) -> anyhow::Result<(&str, &str)> {
    addr.split_once('/')
        .ok_or_else(|| anyhow::anyhow!("polecat address must be `<rig>/<name>`, got {addr:?}"))
}
