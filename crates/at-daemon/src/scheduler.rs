//! Capacity scheduler (§4.3) — enqueues slingable work as context beads and
//! dispatches them into ephemeral worker slots up to `max_polecats`.
//!
//! Context beads are ordinary beads of type `BeadType::Slot` (the scheduler's
//! unit of stored work intent is deliberately a bead like any other, routed
//! and stored through the same adapter — see DESIGN.md) whose description
//! carries an encoded `ContextBeadBlock`. The work bead itself is never
//! mutated here.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use at_agents::worker_lifecycle::{
    AgentRuntime, LifecycleControllerError, SpawnedSlot, WorkerLifecycleController,
};
use at_core::bead_store::{BeadStoreAdapter, BeadStoreError, ListFilter};
use at_core::cache::CacheDb;
use at_core::config::SchedulerConfig;
use at_core::types::{Bead, BeadStatus, BeadType, Convoy, ConvoyStatus, ContextBeadBlock, Dep, DepKind};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("bead store error: {0}")]
    BeadStore(#[from] BeadStoreError),
    #[error("cache error: {0}")]
    Cache(#[from] tokio_rusqlite::Error),
    #[error("bead {bead} routes to pool {actual}, not requested pool {requested}")]
    CrossPool {
        bead: String,
        actual: String,
        requested: String,
    },
    #[error("direct dispatch mode — scheduler is transparent, caller should spawn inline")]
    DirectMode,
    #[error("context bead {0} has no parseable block")]
    InvalidContext(String),
    #[error("worker lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleControllerError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Aggregate queue counts for `status` (§4.3.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStatus {
    pub queued_total: usize,
    pub queued_ready: usize,
}

/// One context bead alongside whether its work bead is currently blocked.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub context_bead_id: String,
    pub block: ContextBeadBlock,
    pub blocked: bool,
}

/// Outcome of one dispatch-loop invocation (§4.3.3).
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub dispatched: Vec<String>,
    pub left_blocked: Vec<String>,
    pub failed: Vec<String>,
    pub circuit_tripped: Vec<String>,
    pub cleaned_invalid: usize,
    pub cleaned_stale: usize,
}

const DISPATCH_FAILED_LABEL: &str = "gt:dispatch-failed";

/// The capacity scheduler for one town/rig combination.
pub struct CapacityScheduler {
    cache: Arc<CacheDb>,
    bead_store: BeadStoreAdapter,
    lifecycle: Arc<WorkerLifecycleController>,
    config: SchedulerConfig,
    /// Slots spawned by this process, keyed by identity id. The patrol loop
    /// draws on this to nuke slots it shares a process with — a crashed
    /// session from a prior daemon run has no entry here and can only be
    /// flagged for escalation, not reaped, since its PTY handle died with
    /// the old process.
    active_slots: Mutex<HashMap<String, SpawnedSlot>>,
}

impl CapacityScheduler {
    pub fn new(
        cache: Arc<CacheDb>,
        lifecycle: Arc<WorkerLifecycleController>,
        config: SchedulerConfig,
    ) -> Self {
        let bead_store = BeadStoreAdapter::new(cache.clone())
            .with_retry_backoff_secs(config.retry_backoff_secs);
        Self {
            cache,
            bead_store,
            lifecycle,
            config,
            active_slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn lifecycle(&self) -> &WorkerLifecycleController {
        &self.lifecycle
    }

    /// Remove and return a previously spawned slot this process still holds
    /// a live PTY handle for, if any.
    pub fn take_slot(&self, identity_id: &str) -> Option<SpawnedSlot> {
        self.active_slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identity_id)
    }

    /// `-1`/`0` is direct dispatch (transparent scheduler); any positive
    /// value enables deferred dispatch via the context-bead queue.
    pub fn is_deferred(&self) -> bool {
        self.config.max_polecats > 0
    }

    // -----------------------------------------------------------------------
    // Enqueue (§4.3.2)
    // -----------------------------------------------------------------------

    pub async fn enqueue(
        &self,
        work_bead_id: &str,
        target_rig: &str,
        batch_convoy: Option<&str>,
    ) -> Result<String> {
        if !self.is_deferred() {
            return Err(SchedulerError::DirectMode);
        }

        let work_bead = self.bead_store.show(work_bead_id).await?;
        if let Some(ref rig) = work_bead.rig {
            if rig != target_rig {
                return Err(SchedulerError::CrossPool {
                    bead: work_bead_id.to_string(),
                    actual: rig.clone(),
                    requested: target_rig.to_string(),
                });
            }
        }

        if let Some(existing) = self.find_open_context_for(work_bead_id).await? {
            debug!(work_bead = %work_bead_id, context = %existing, "context bead already queued, skipping");
            return Ok(existing);
        }

        let convoy_id = match batch_convoy {
            Some(id) => id.to_string(),
            None => self.create_auto_convoy(&work_bead).await?,
        };

        let mut block = ContextBeadBlock::new(work_bead_id, target_rig);
        block.convoy = Some(convoy_id);

        let context_id = format!("ctx-{}", Uuid::new_v4());
        let mut context_bead = Bead::new(context_id.clone(), format!("context: {}", work_bead.title), BeadType::Slot);
        context_bead.description = Some(block.encode());
        self.bead_store.create(context_bead).await?;

        info!(work_bead = %work_bead_id, rig = %target_rig, context = %context_id, "enqueued context bead");
        Ok(context_id)
    }

    async fn find_open_context_for(&self, work_bead_id: &str) -> Result<Option<String>> {
        let open = self
            .bead_store
            .list(&ListFilter {
                status: Some(BeadStatus::Open),
                bead_type: Some(BeadType::Slot),
            })
            .await?;
        for bead in open {
            if bead.has_label(DISPATCH_FAILED_LABEL) {
                continue;
            }
            if let Some(block) = bead.description.as_deref().and_then(ContextBeadBlock::parse) {
                if block.work_bead == work_bead_id {
                    return Ok(Some(bead.id));
                }
            }
        }
        Ok(None)
    }

    async fn create_auto_convoy(&self, work_bead: &Bead) -> Result<String> {
        let id = format!("gt-convoy-{}", Uuid::new_v4());
        let title = format!("Work: {}", work_bead.title);

        let mut convoy_bead = Bead::new(id.clone(), title.clone(), BeadType::Convoy);
        convoy_bead.status = BeadStatus::Open;
        if let Err(e) = self.bead_store.create(convoy_bead).await {
            warn!(error = %e, "failed to create auto-convoy bead, proceeding without batch grouping");
            return Ok(id);
        }

        let convoy = Convoy {
            id: id.clone(),
            title,
            status: ConvoyStatus::Open,
            tracked: std::iter::once(work_bead.id.clone()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.cache.upsert_convoy(&convoy).await {
            warn!(error = %e, "failed to materialize convoy cache row, orphan-cleaning the convoy bead");
            self.bead_store
                .close(&id, true, Some("orphan-clean"))
                .await?;
            return Ok(id);
        }

        self.bead_store
            .dep_add(Dep {
                issue_id: id.clone(),
                depends_on: work_bead.id.clone(),
                kind: DepKind::Tracks,
            })
            .await?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Dispatch loop (§4.3.3)
    // -----------------------------------------------------------------------

    pub async fn dispatch(
        &self,
        default_branch: &str,
        runtime: &dyn AgentRuntime,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        let open_context = self
            .bead_store
            .list(&ListFilter {
                status: Some(BeadStatus::Open),
                bead_type: Some(BeadType::Slot),
            })
            .await?;

        // Stale-cleanup pass.
        let mut candidates = Vec::new();
        for bead in open_context {
            if bead.has_label(DISPATCH_FAILED_LABEL) {
                continue;
            }
            let Some(block) = bead.description.as_deref().and_then(ContextBeadBlock::parse) else {
                self.bead_store.close(&bead.id, false, Some("invalid-context")).await?;
                report.cleaned_invalid += 1;
                continue;
            };
            match self.bead_store.show(&block.work_bead).await {
                Ok(work_bead) if work_bead.status != BeadStatus::Closed => {
                    candidates.push((bead, block, work_bead));
                }
                _ => {
                    self.bead_store.close(&bead.id, false, Some("stale")).await?;
                    report.cleaned_stale += 1;
                }
            }
        }

        // Oldest-first, bounded by batch_size.
        candidates.sort_by_key(|(_, block, _)| block.enqueued_at);

        for (context_bead, mut block, work_bead) in candidates.into_iter().take(self.config.batch_size) {
            if self.has_open_blocker(&work_bead).await? {
                report.left_blocked.push(context_bead.id.clone());
                continue;
            }

            let slot_name = format!("polecat-{}", &context_bead.id[context_bead.id.len().saturating_sub(8)..]);
            let spawn_result = self
                .lifecycle
                .spawn(
                    &block.target_rig,
                    &slot_name,
                    default_branch,
                    || format!("gt-agent-{}", Uuid::new_v4()),
                    runtime,
                )
                .await;

            match spawn_result {
                Ok(mut slot) => {
                    self.bead_store.close(&context_bead.id, false, None).await?;
                    self.bead_store
                        .update(&work_bead.id, |b| b.status = BeadStatus::Hooked)
                        .await?;
                    slot.identity.hook = Some(work_bead.id.clone());
                    self.cache.upsert_identity(&slot.identity).await?;
                    report.dispatched.push(context_bead.id.clone());
                    self.active_slots
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(slot.identity.id.clone(), slot);
                }
                Err(e) => {
                    block.dispatch_failures += 1;
                    block.last_failure = Some(e.to_string());
                    let mut updated = context_bead.clone();
                    updated.description = Some(block.encode());
                    if block.dispatch_failures >= self.config.max_dispatch_failures {
                        updated.labels.insert(DISPATCH_FAILED_LABEL.to_string());
                        report.circuit_tripped.push(context_bead.id.clone());
                        warn!(context = %context_bead.id, failures = block.dispatch_failures, "dispatch circuit tripped");
                    } else {
                        report.failed.push(context_bead.id.clone());
                    }
                    self.bead_store.create(updated).await?;
                }
            }
        }

        Ok(report)
    }

    async fn has_open_blocker(&self, bead: &Bead) -> Result<bool> {
        for blocker_id in &bead.blocked_by {
            if let Ok(blocker) = self.bead_store.show(blocker_id).await {
                if blocker.status != BeadStatus::Closed {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Status (§4.3.4)
    // -----------------------------------------------------------------------

    pub async fn list(&self) -> Result<Vec<QueuedItem>> {
        let open = self
            .bead_store
            .list(&ListFilter {
                status: Some(BeadStatus::Open),
                bead_type: Some(BeadType::Slot),
            })
            .await?;

        let mut out = Vec::new();
        for bead in open {
            if bead.has_label(DISPATCH_FAILED_LABEL) {
                continue;
            }
            let Some(block) = bead.description.as_deref().and_then(ContextBeadBlock::parse) else {
                continue;
            };
            let blocked = match self.bead_store.show(&block.work_bead).await {
                Ok(work_bead) => self.has_open_blocker(&work_bead).await?,
                Err(_) => true,
            };
            out.push(QueuedItem {
                context_bead_id: bead.id,
                block,
                blocked,
            });
        }
        Ok(out)
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let items = self.list().await?;
        Ok(SchedulerStatus {
            queued_total: items.len(),
            queued_ready: items.iter().filter(|i| !i.blocked).count(),
        })
    }
}
