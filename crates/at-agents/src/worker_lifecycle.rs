//! Ephemeral worker (polecat) spawn, nuke, and staleness detection.
//!
//! A polecat's working life is: acquire or create its identity bead, stand up
//! a worktree and a named PTY session, launch the agent runtime, and flip the
//! identity to `working`. Tearing one down runs the same sequence in reverse,
//! gated by a safety check so a slot with uncommitted or unpushed work is
//! never silently discarded.

use std::sync::Arc;
use std::time::Duration;

use at_core::cache::CacheDb;
use at_core::types::{AgentIdentity, AgentLifecycleState, AgentRole, CleanupStatus, RecoveryVerdict};
use at_core::worktree::{WorktreeError, WorktreeInfo, WorktreeManager};
use at_session::pty_pool::{PtyError, PtyHandle, PtyPool};
use chrono::{DateTime, Utc};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LifecycleControllerError {
    #[error("cache error: {0}")]
    Cache(#[from] tokio_rusqlite::Error),
    #[error("worktree error: {0}")]
    Worktree(#[from] WorktreeError),
    #[error("pty error: {0}")]
    Pty(#[from] PtyError),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("safety blocked: {0}")]
    SafetyBlocked(String),
}

pub type Result<T> = std::result::Result<T, LifecycleControllerError>;

// ---------------------------------------------------------------------------
// AgentRuntime — the black-box agent process
// ---------------------------------------------------------------------------

/// The running agent process itself is out of scope for this controller; it
/// is launched and its liveness polled through this trait so tests can
/// substitute a fake without spawning a real agent binary.
pub trait AgentRuntime: Send + Sync {
    /// Launch the agent runtime attached to the given PTY, returning once the
    /// process has been started (not once it has finished working).
    fn launch(&self, pty: &PtyHandle, worktree: &WorktreeInfo) -> Result<()>;

    /// Best-effort liveness check used by the spawn sequence's alive-wait and
    /// by staleness detection.
    fn is_alive(&self, pty: &PtyHandle) -> bool;
}

/// Runtime that shells a configured command line into the PTY and treats the
/// PTY process itself as the liveness signal.
pub struct ShellAgentRuntime {
    pub command: String,
    pub args: Vec<String>,
}

impl AgentRuntime for ShellAgentRuntime {
    fn launch(&self, pty: &PtyHandle, worktree: &WorktreeInfo) -> Result<()> {
        let cd = format!("cd {}", worktree.path);
        pty.send_line(&cd)
            .map_err(|e| LifecycleControllerError::SpawnFailed(e.to_string()))?;
        let mut line = self.command.clone();
        for a in &self.args {
            line.push(' ');
            line.push_str(a);
        }
        pty.send_line(&line)
            .map_err(|e| LifecycleControllerError::SpawnFailed(e.to_string()))?;
        Ok(())
    }

    fn is_alive(&self, pty: &PtyHandle) -> bool {
        pty.is_alive()
    }
}

// ---------------------------------------------------------------------------
// WorkerLifecycleController
// ---------------------------------------------------------------------------

pub struct WorkerLifecycleController {
    cache: Arc<CacheDb>,
    ptys: Arc<PtyPool>,
    pool_dir: String,
    alive_wait: Duration,
}

/// A fully spawned polecat slot: its identity, worktree, and PTY handle.
pub struct SpawnedSlot {
    pub identity: AgentIdentity,
    pub worktree: WorktreeInfo,
    pub pty: PtyHandle,
}

impl WorkerLifecycleController {
    pub fn new(cache: Arc<CacheDb>, ptys: Arc<PtyPool>, pool_dir: impl Into<String>) -> Self {
        Self {
            cache,
            ptys,
            pool_dir: pool_dir.into(),
            alive_wait: Duration::from_secs(5),
        }
    }

    pub fn with_alive_wait(mut self, d: Duration) -> Self {
        self.alive_wait = d;
        self
    }

    /// Spawn sequence (§4.4.1): acquire-or-create the identity bead, stand up
    /// the worktree and PTY, launch the runtime, wait for it to come alive,
    /// and only then flip the identity to `working`. Any failure after the
    /// identity is acquired unwinds what was already created, in reverse.
    pub async fn spawn(
        &self,
        rig: &str,
        name: &str,
        base_branch: &str,
        identity_id_for_new: impl Fn() -> String,
        runtime: &dyn AgentRuntime,
    ) -> Result<SpawnedSlot> {
        let mut identity = match self.cache.get_identity_by_name(rig, name).await? {
            Some(existing) if existing.state == AgentLifecycleState::Nuked => {
                // Reuse a nuked identity bead rather than leaving an orphan.
                let mut reused = existing;
                reused.state = AgentLifecycleState::Idle;
                reused.cleanup_status = CleanupStatus::Unknown;
                reused.hook = None;
                reused.active_mr = None;
                reused.updated_at = Utc::now();
                self.cache.upsert_identity(&reused).await?;
                reused
            }
            Some(existing) => existing,
            None => {
                let identity = AgentIdentity::new(identity_id_for_new(), AgentRole::Polecat, rig, name);
                self.cache.upsert_identity(&identity).await?;
                identity
            }
        };

        let worktree = match WorktreeManager::create_polecat_worktree(&self.pool_dir, name, base_branch)
        {
            Ok(wt) => wt,
            Err(e) => {
                self.unwind_identity(&identity).await;
                return Err(e.into());
            }
        };

        let pty = match self.ptys.spawn("bash", &[], &[]) {
            Ok(pty) => pty,
            Err(e) => {
                self.unwind_worktree(&worktree);
                self.unwind_identity(&identity).await;
                return Err(e.into());
            }
        };

        if let Err(e) = runtime.launch(&pty, &worktree) {
            let _ = pty.kill();
            self.ptys.release(pty.id);
            self.unwind_worktree(&worktree);
            self.unwind_identity(&identity).await;
            return Err(e);
        }

        if !self.wait_alive(runtime, &pty).await {
            let _ = pty.kill();
            self.ptys.release(pty.id);
            self.unwind_worktree(&worktree);
            self.unwind_identity(&identity).await;
            return Err(LifecycleControllerError::SpawnFailed(
                "agent runtime did not come alive in time".into(),
            ));
        }

        identity.state = AgentLifecycleState::Working;
        identity.updated_at = Utc::now();
        self.cache.upsert_identity(&identity).await?;

        Ok(SpawnedSlot {
            identity,
            worktree,
            pty,
        })
    }

    async fn wait_alive(&self, runtime: &dyn AgentRuntime, pty: &PtyHandle) -> bool {
        let start = std::time::Instant::now();
        loop {
            if runtime.is_alive(pty) {
                return true;
            }
            if start.elapsed() >= self.alive_wait {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn unwind_worktree(&self, worktree: &WorktreeInfo) {
        if let Err(e) = WorktreeManager::delete_worktree(&worktree.path, &self.pool_dir) {
            tracing::warn!(path = %worktree.path, error = %e, "failed to unwind worktree after spawn failure");
        }
    }

    async fn unwind_identity(&self, identity: &AgentIdentity) {
        let mut reverted = identity.clone();
        reverted.state = AgentLifecycleState::Idle;
        if let Err(e) = self.cache.upsert_identity(&reverted).await {
            tracing::warn!(id = %identity.id, error = %e, "failed to unwind identity after spawn failure");
        }
    }

    // -----------------------------------------------------------------------
    // Pre-nuke safety gate (§4.4.3)
    // -----------------------------------------------------------------------

    /// Decide whether a slot is safe to reclaim. `Clean` is always safe.
    /// `Uncommitted`/`Stash` always need recovery (a human or the completion
    /// protocol must resolve them first). `Unpushed` needs an mq-submit pass
    /// (push what's there) before it can be nuked. `Unknown` degrades to
    /// `NeedsRecovery` — see DESIGN.md's Open Question resolution.
    pub fn safety_gate(&self, cleanup_status: CleanupStatus) -> RecoveryVerdict {
        match cleanup_status {
            CleanupStatus::Clean => RecoveryVerdict::SafeToNuke,
            CleanupStatus::Unpushed => RecoveryVerdict::NeedsMqSubmit,
            CleanupStatus::Uncommitted | CleanupStatus::Stash | CleanupStatus::Unknown => {
                RecoveryVerdict::NeedsRecovery
            }
        }
    }

    /// 6-step nuke sequence: verify the safety gate, kill the PTY, release
    /// the pool slot, remove the worktree, clear the identity's hook/mr
    /// fields, and finally mark the identity `nuked`.
    pub async fn nuke(
        &self,
        identity: &AgentIdentity,
        worktree: &WorktreeInfo,
        pty: &PtyHandle,
    ) -> Result<()> {
        let verdict = self.safety_gate(identity.cleanup_status);
        if verdict != RecoveryVerdict::SafeToNuke {
            return Err(LifecycleControllerError::SafetyBlocked(format!(
                "slot {} is not safe to nuke: {:?}",
                identity.name, verdict
            )));
        }

        let _ = pty.kill();
        self.ptys.release(pty.id);
        WorktreeManager::delete_worktree(&worktree.path, &self.pool_dir)?;

        let mut nuked = identity.clone();
        nuked.hook = None;
        nuked.active_mr = None;
        nuked.state = AgentLifecycleState::Nuked;
        nuked.updated_at = Utc::now();
        self.cache.upsert_identity(&nuked).await?;

        tracing::info!(name = %identity.name, rig = %identity.rig, "slot nuked");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Staleness detection (§4.4.5)
    // -----------------------------------------------------------------------

    /// A `working` identity is stale once it has not been updated for
    /// `max_age` — the witness's periodic full-discovery sweep uses this to
    /// find crashed sessions that never wrote a done-intent label.
    pub fn is_stale(&self, identity: &AgentIdentity, now: DateTime<Utc>, max_age: Duration) -> bool {
        identity.state == AgentLifecycleState::Working
            && (now - identity.updated_at)
                .to_std()
                .map(|age| age >= max_age)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAlive;
    impl AgentRuntime for AlwaysAlive {
        fn launch(&self, _pty: &PtyHandle, _worktree: &WorktreeInfo) -> Result<()> {
            Ok(())
        }
        fn is_alive(&self, _pty: &PtyHandle) -> bool {
            true
        }
    }

    fn make_identity(state: AgentLifecycleState) -> AgentIdentity {
        let mut id = AgentIdentity::new("gt-agent-1", AgentRole::Polecat, "rigA", "polecat-1");
        id.state = state;
        id
    }

    #[tokio::test]
    async fn safety_gate_clean_is_safe() {
        let cache = Arc::new(CacheDb::new_in_memory().await.unwrap());
        let ptys = Arc::new(PtyPool::new(4));
        let ctrl = WorkerLifecycleController::new(cache, ptys, "/tmp/pool");
        assert_eq!(
            ctrl.safety_gate(CleanupStatus::Clean),
            RecoveryVerdict::SafeToNuke
        );
        assert_eq!(
            ctrl.safety_gate(CleanupStatus::Unpushed),
            RecoveryVerdict::NeedsMqSubmit
        );
        assert_eq!(
            ctrl.safety_gate(CleanupStatus::Uncommitted),
            RecoveryVerdict::NeedsRecovery
        );
        assert_eq!(
            ctrl.safety_gate(CleanupStatus::Unknown),
            RecoveryVerdict::NeedsRecovery
        );
    }

    #[tokio::test]
    async fn staleness_detects_old_working_identity() {
        let cache = Arc::new(CacheDb::new_in_memory().await.unwrap());
        let ptys = Arc::new(PtyPool::new(4));
        let ctrl = WorkerLifecycleController::new(cache, ptys, "/tmp/pool");
        let mut identity = make_identity(AgentLifecycleState::Working);
        identity.updated_at = Utc::now() - chrono::Duration::hours(2);
        assert!(ctrl.is_stale(&identity, Utc::now(), Duration::from_secs(3600)));

        let mut fresh = make_identity(AgentLifecycleState::Working);
        fresh.updated_at = Utc::now();
        assert!(!ctrl.is_stale(&fresh, Utc::now(), Duration::from_secs(3600)));

        let idle = make_identity(AgentLifecycleState::Idle);
        assert!(!ctrl.is_stale(&idle, Utc::now(), Duration::from_secs(0)));
    }
}
