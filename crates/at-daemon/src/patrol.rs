//! Event-driven patrol loop (§4.6) — the witness's reactor. Tails an
//! append-only event log for immediate reactions and runs a periodic
//! full-discovery sweep for everything the tailer can miss (crashed
//! sessions that never wrote an event, orphaned merge requests).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use at_agents::worker_lifecycle::WorkerLifecycleController;
use at_core::bead_store::{BeadStoreAdapter, ListFilter};
use at_core::cache::CacheDb;
use at_core::config::PatrolConfig;
use at_core::event_log::{EventLogEntry, EventLogTailer, EventType};
use at_core::types::{AgentLifecycleState, BeadStatus, BeadType, RecoveryVerdict};
use at_harness::shutdown::ShutdownSignal;
use tracing::{debug, info, warn};

use crate::heartbeat::HeartbeatMonitor;
use crate::scheduler::CapacityScheduler;

/// Tally of one full-discovery pass, returned for logging/KPI purposes.
#[derive(Debug, Clone, Default)]
pub struct PatrolReport {
    pub stale_agents: usize,
    pub reaped: usize,
    pub escalated: usize,
    pub orphaned_merge_requests: usize,
}

pub struct PatrolRunner {
    cache: Arc<CacheDb>,
    scheduler: Arc<CapacityScheduler>,
    lifecycle: Arc<WorkerLifecycleController>,
    bead_store: BeadStoreAdapter,
    heartbeat: HeartbeatMonitor,
    event_log_path: PathBuf,
    config: PatrolConfig,
}

impl PatrolRunner {
    pub fn new(
        cache: Arc<CacheDb>,
        scheduler: Arc<CapacityScheduler>,
        lifecycle: Arc<WorkerLifecycleController>,
        event_log_path: impl Into<PathBuf>,
        config: PatrolConfig,
        staleness_threshold: Duration,
    ) -> Self {
        let bead_store = BeadStoreAdapter::new(cache.clone());
        Self {
            cache,
            scheduler,
            lifecycle,
            bead_store,
            heartbeat: HeartbeatMonitor::new(staleness_threshold),
            event_log_path: event_log_path.into(),
            config,
        }
    }

    /// Run until `shutdown` fires. Tails the event log on a debounced
    /// interval and runs full discovery on the longer patrol interval; both
    /// are cooperative against the shared shutdown signal.
    pub async fn run(&self, rig: &str, shutdown: ShutdownSignal) -> Result<()> {
        let mut tailer = EventLogTailer::from_tail(&self.event_log_path)
            .context("failed to open event log for tailing")?;
        let mut debounce =
            tokio::time::interval(Duration::from_secs(self.config.debounce_secs.max(1)));
        let mut discovery =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        let mut shutdown_rx = shutdown.subscribe();

        info!(
            rig = %rig,
            interval_secs = self.config.interval_secs,
            debounce_secs = self.config.debounce_secs,
            "patrol loop starting"
        );

        loop {
            tokio::select! {
                _ = debounce.tick() => {
                    match tailer.poll() {
                        Ok(entries) => {
                            for entry in entries {
                                self.react(rig, entry).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "event log poll failed"),
                    }
                }
                _ = discovery.tick() => {
                    match self.full_discovery(rig).await {
                        Ok(report) => info!(rig = %rig, ?report, "full discovery patrol complete"),
                        Err(e) => warn!(rig = %rig, error = %e, "full discovery patrol failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(rig = %rig, "patrol loop shutting down");
                    shutdown.confirm_drained();
                    return Ok(());
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tailer reactions (§4.6)
    // -----------------------------------------------------------------------

    async fn react(&self, rig: &str, entry: EventLogEntry) {
        debug!(rig = %rig, event = ?entry.event_type, actor = %entry.actor, "patrol reaction");
        let result = match entry.event_type {
            EventType::Done => self.on_done(rig, &entry.actor).await,
            EventType::Merged => self.on_merged(rig, &entry.actor).await,
            EventType::MergeFailed => self.on_merge_failed(&entry.actor).await,
            EventType::SessionDeath => self.on_session_death(rig, &entry.actor).await,
            EventType::Kill => self.on_kill(&entry.actor).await,
            EventType::Nudge => {
                debug!(actor = %entry.actor, "nudge received, no action required");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(rig = %rig, actor = %entry.actor, event = ?entry.event_type, error = %e, "patrol reaction failed");
        }
    }

    /// `done` → evaluate the recovery verdict and nuke if safe, otherwise
    /// leave for human escalation.
    async fn on_done(&self, rig: &str, identity_name: &str) -> Result<()> {
        self.reap_or_escalate(rig, identity_name).await.map(|_| ())
    }

    /// `merged` → same verdict-then-nuke path; the branch merge itself is
    /// verified upstream by the completion protocol before this event fires.
    async fn on_merged(&self, rig: &str, identity_name: &str) -> Result<()> {
        self.reap_or_escalate(rig, identity_name).await.map(|_| ())
    }

    /// `merge_failed` → nothing to reclaim; leave the slot for the
    /// originating agent and the coordinator to see via the identity bead's
    /// unchanged `working` state.
    async fn on_merge_failed(&self, identity_name: &str) -> Result<()> {
        warn!(identity = %identity_name, "merge failed, leaving slot for manual follow-up");
        Ok(())
    }

    /// `session_death` → if a done-intent label is present on the agent's
    /// hooked work bead, the worker reached a terminal state before dying;
    /// drive the same crash-recovery nuke path gated by cleanup-status.
    async fn on_session_death(&self, rig: &str, identity_name: &str) -> Result<()> {
        self.reap_or_escalate(rig, identity_name).await.map(|_| ())
    }

    /// `kill` → scan for beads still pointing at the killed agent as
    /// assignee and flag them for reassignment.
    async fn on_kill(&self, identity_name: &str) -> Result<()> {
        let open = self
            .bead_store
            .list(&ListFilter {
                status: Some(BeadStatus::Open),
                bead_type: None,
            })
            .await?;
        for bead in open
            .iter()
            .filter(|b| b.assignee.as_deref() == Some(identity_name))
        {
            warn!(bead = %bead.id, agent = %identity_name, "bead orphaned by killed agent");
        }
        Ok(())
    }

    /// Returns `Ok(true)` if the slot was reaped, `Ok(false)` if it was left
    /// for human escalation (unsafe to nuke, or no identity/live handle).
    async fn reap_or_escalate(&self, rig: &str, identity_name: &str) -> Result<bool> {
        let Some(identity) = self
            .cache
            .get_identity_by_name(rig, identity_name)
            .await
            .ok()
            .flatten()
        else {
            return Ok(false);
        };
        let verdict = self.lifecycle.safety_gate(identity.cleanup_status);
        if verdict != RecoveryVerdict::SafeToNuke {
            warn!(identity = %identity_name, ?verdict, "not safe to nuke, leaving for human escalation");
            return Ok(false);
        }
        match self.scheduler.take_slot(&identity.id) {
            Some(slot) => {
                self.lifecycle
                    .nuke(&slot.identity, &slot.worktree, &slot.pty)
                    .await?;
                info!(identity = %identity_name, "slot reaped after safe completion");
                Ok(true)
            }
            None => {
                warn!(identity = %identity_name, "safe to nuke but no live slot handle in this process, escalating");
                Ok(false)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Full discovery (§4.6)
    // -----------------------------------------------------------------------

    pub async fn full_discovery(&self, rig: &str) -> Result<PatrolReport> {
        let mut report = PatrolReport::default();

        let stale = self.heartbeat.check_rig(&self.cache, rig).await?;
        report.stale_agents = stale.len();
        for agent in &stale {
            warn!(
                agent = %agent.name,
                rig = %agent.rig,
                duration_since = ?agent.duration_since,
                "stale working identity found"
            );
            match self.reap_or_escalate(rig, &agent.name).await {
                Ok(true) => report.reaped += 1,
                Ok(false) => report.escalated += 1,
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "stale-agent reap attempt failed");
                    report.escalated += 1;
                }
            }
        }

        report.orphaned_merge_requests = self.scan_orphaned_merge_requests(rig).await?;

        Ok(report)
    }

    /// An open merge-request bead with no identity in the rig actively
    /// tracking it as `active_mr` is orphaned — its agent was nuked or
    /// crashed before the refinery closed it out.
    async fn scan_orphaned_merge_requests(&self, rig: &str) -> Result<usize> {
        let open_mrs = self
            .bead_store
            .list(&ListFilter {
                status: Some(BeadStatus::Open),
                bead_type: Some(BeadType::MergeRequest),
            })
            .await?;
        if open_mrs.is_empty() {
            return Ok(0);
        }

        let identities = self.cache.list_identities_by_rig(rig).await?;
        let tracked: std::collections::HashSet<&str> = identities
            .iter()
            .filter(|id| id.state != AgentLifecycleState::Nuked)
            .filter_map(|id| id.active_mr.as_deref())
            .collect();

        let mut orphaned = 0;
        for mr in open_mrs {
            if !tracked.contains(mr.id.as_str()) {
                warn!(merge_request = %mr.id, "orphaned merge request with no tracking agent");
                orphaned += 1;
            }
        }
        Ok(orphaned)
    }
}
