//! The stage planner itself (§4.2): wires input classification, bead
//! collection, DAG construction, cycle detection, wave computation, and
//! finding detection into one `stage()` call, with re-stage support.

use std::sync::Arc;

use at_core::bead_store::{BeadStoreAdapter, BeadStoreError};
use at_core::cache::CacheDb;
use at_core::types::{Bead, BeadStatus, BeadType, Convoy, ConvoyStatus, Dep, DepKind};
use chrono::Utc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::collect::{self, BeadClosure, CollectError};
use crate::dag::ExecutionDag;
use crate::findings::{collect_findings, AlwaysActive, Finding, RigStatusProvider};
use crate::input::{self, InputError, StageInput};
use crate::render::JsonTreeNode;
use crate::waves::{compute_waves, Wave, WaveError};

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Store(#[from] BeadStoreError),
    #[error("no slingable work in the planned set")]
    NoSlingableWork,
}

pub type Result<T> = std::result::Result<T, StageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    StagedReady,
    StagedWarnings,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::StagedReady => "staged_ready",
            StageStatus::StagedWarnings => "staged_warnings",
            StageStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableRow {
    pub id: String,
    pub title: String,
    pub rig: Option<String>,
    pub blockers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StagePlan {
    pub status: StageStatus,
    pub convoy_id: Option<String>,
    pub findings: Vec<Finding>,
    pub waves: Vec<Wave>,
    pub tree: Vec<JsonTreeNode>,
    pub table_rows: Vec<TableRow>,
}

const STAGE_CONVOY_PREFIX: &str = "gt-convoy-";

pub struct StagePlanner {
    cache: Arc<CacheDb>,
    bead_store: BeadStoreAdapter,
}

impl StagePlanner {
    pub fn new(cache: Arc<CacheDb>) -> Self {
        let bead_store = BeadStoreAdapter::new(cache.clone());
        Self { cache, bead_store }
    }

    /// Run the full pipeline for the raw CLI-ish args. `capacity_threshold`
    /// overrides §4.2.6's default wave-size threshold when set.
    pub async fn stage(
        &self,
        raw_args: &[String],
        rig_status: &dyn RigStatusProvider,
        capacity_threshold: Option<usize>,
    ) -> Result<StagePlan> {
        let ids = input::classify(raw_args)?;

        let mut is_epic = std::collections::HashMap::new();
        let mut is_convoy = std::collections::HashMap::new();
        for id in &ids {
            let bead = self.bead_store.show(id).await?;
            is_epic.insert(id.clone(), bead.bead_type == BeadType::Epic);
            is_convoy.insert(id.clone(), bead.bead_type == BeadType::Convoy);
        }
        let stage_input = input::resolve(
            &ids,
            |id| *is_epic.get(id).unwrap_or(&false),
            |id| *is_convoy.get(id).unwrap_or(&false),
        )?;

        let restage = match &stage_input {
            StageInput::Convoy(id) => {
                let bead = self.bead_store.show(id).await?;
                bead.status.is_staged()
            }
            _ => false,
        };

        let closure = collect::collect(&self.bead_store, &stage_input).await?;
        self.plan_from_closure(closure, &stage_input, rig_status, capacity_threshold, restage)
            .await
    }

    async fn plan_from_closure(
        &self,
        closure: BeadClosure,
        stage_input: &StageInput,
        rig_status: &dyn RigStatusProvider,
        capacity_threshold: Option<usize>,
        restage: bool,
    ) -> Result<StagePlan> {
        let dag = ExecutionDag::build(&closure);
        let cycle = dag.find_cycle();

        let waves = if cycle.is_some() {
            Vec::new()
        } else {
            match compute_waves(&dag) {
                Ok(w) => w,
                Err(WaveError::Empty) => return Err(StageError::NoSlingableWork),
                Err(WaveError::Cycle(stuck)) => {
                    let findings = collect_findings(
                        &dag,
                        Some(stuck.as_slice()),
                        &[],
                        stage_input,
                        rig_status,
                        capacity_threshold,
                    );
                    return Ok(StagePlan {
                        status: StageStatus::Error,
                        convoy_id: None,
                        findings,
                        waves: Vec::new(),
                        tree: build_tree(&closure),
                        table_rows: build_table_rows(&dag),
                    });
                }
            }
        };

        let findings = collect_findings(
            &dag,
            cycle.as_deref(),
            &waves,
            stage_input,
            rig_status,
            capacity_threshold,
        );

        let has_errors = findings.iter().any(|f| f.is_error());
        let tree = build_tree(&closure);
        let table_rows = build_table_rows(&dag);

        if has_errors {
            return Ok(StagePlan {
                status: StageStatus::Error,
                convoy_id: None,
                findings,
                waves,
                tree,
                table_rows,
            });
        }

        let status = if findings.is_empty() {
            StageStatus::StagedReady
        } else {
            StageStatus::StagedWarnings
        };

        let convoy_id = if restage {
            if let StageInput::Convoy(id) = stage_input {
                self.update_restaged_convoy(id, status, &waves).await?;
                Some(id.clone())
            } else {
                None
            }
        } else {
            Some(self.materialize_convoy(status, &waves).await?)
        };

        Ok(StagePlan {
            status,
            convoy_id,
            findings,
            waves,
            tree,
            table_rows,
        })
    }

    /// Materialize a `convoy` bead tracking every slingable bead in the
    /// plan, with `tracks` deps to each. Never tracks epics or decisions.
    async fn materialize_convoy(&self, status: StageStatus, waves: &[Wave]) -> Result<String> {
        let id = format!("{STAGE_CONVOY_PREFIX}{}", Uuid::new_v4());
        let task_count: usize = waves.iter().map(|w| w.tasks.len()).sum();
        let tracked: Vec<String> = waves.iter().flat_map(|w| w.tasks.clone()).collect();

        let mut convoy_bead = Bead::new(
            id.clone(),
            format!("Stage ({} tasks, {} waves)", task_count, waves.len()),
            BeadType::Convoy,
        );
        convoy_bead.status = match status {
            StageStatus::StagedReady => BeadStatus::StagedReady,
            StageStatus::StagedWarnings => BeadStatus::StagedWarnings,
            StageStatus::Error => unreachable!("errors never reach convoy materialization"),
        };
        convoy_bead.description = Some(format!(
            "tasks={task_count} waves={} staged_at={}",
            waves.len(),
            Utc::now().to_rfc3339(),
        ));
        self.bead_store.create(convoy_bead).await?;

        for task_id in &tracked {
            self.bead_store
                .dep_add(Dep {
                    issue_id: id.clone(),
                    depends_on: task_id.clone(),
                    kind: DepKind::Tracks,
                })
                .await?;
        }

        let convoy = Convoy {
            id: id.clone(),
            title: format!("Stage ({task_count} tasks, {} waves)", waves.len()),
            status: match status {
                StageStatus::StagedReady => ConvoyStatus::StagedReady,
                StageStatus::StagedWarnings => ConvoyStatus::StagedWarnings,
                StageStatus::Error => unreachable!("errors never reach convoy materialization"),
            },
            tracked: tracked.into_iter().collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.cache.upsert_convoy(&convoy).await {
            warn!(convoy = %id, error = %e, "failed to materialize convoy cache row; bead remains the source of truth");
        }

        Ok(id)
    }

    /// Re-stage (§4.2.7): skip convoy creation and tracks-dep creation,
    /// update only the convoy's status and description to reflect the new
    /// plan.
    async fn update_restaged_convoy(&self, convoy_id: &str, status: StageStatus, waves: &[Wave]) -> Result<()> {
        let task_count: usize = waves.iter().map(|w| w.tasks.len()).sum();
        let bead_status = match status {
            StageStatus::StagedReady => BeadStatus::StagedReady,
            StageStatus::StagedWarnings => BeadStatus::StagedWarnings,
            StageStatus::Error => unreachable!("errors never reach convoy materialization"),
        };
        self.bead_store
            .update(convoy_id, |b| {
                b.status = bead_status;
                b.description = Some(format!(
                    "tasks={task_count} waves={} staged_at={}",
                    waves.len(),
                    Utc::now().to_rfc3339(),
                ));
            })
            .await?;

        if let Ok(Some(mut convoy)) = self.cache.get_convoy(convoy_id).await {
            convoy.status = match status {
                StageStatus::StagedReady => ConvoyStatus::StagedReady,
                StageStatus::StagedWarnings => ConvoyStatus::StagedWarnings,
                StageStatus::Error => unreachable!("errors never reach convoy materialization"),
            };
            convoy.updated_at = Utc::now();
            let _ = self.cache.upsert_convoy(&convoy).await;
        }
        Ok(())
    }
}

fn build_table_rows(dag: &ExecutionDag) -> Vec<TableRow> {
    let mut rows: Vec<TableRow> = dag
        .nodes
        .values()
        .filter(|n| n.bead_type.is_slingable())
        .map(|n| {
            let mut blockers: Vec<String> = n.blocked_by.iter().cloned().collect();
            blockers.sort();
            TableRow {
                id: n.id.clone(),
                title: n.title.clone(),
                rig: n.rig.clone(),
                blockers,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}

fn build_tree(closure: &BeadClosure) -> Vec<JsonTreeNode> {
    let roots: Vec<&Bead> = closure
        .beads
        .values()
        .filter(|b| b.parent.as_deref().map_or(true, |p| !closure.beads.contains_key(p)))
        .collect();
    let mut roots_sorted = roots;
    roots_sorted.sort_by(|a, b| a.id.cmp(&b.id));
    roots_sorted.into_iter().map(|b| build_tree_node(b, closure)).collect()
}

fn build_tree_node(bead: &Bead, closure: &BeadClosure) -> JsonTreeNode {
    let mut children: Vec<&Bead> = bead
        .children
        .iter()
        .filter_map(|id| closure.beads.get(id))
        .collect();
    children.sort_by(|a, b| a.id.cmp(&b.id));
    JsonTreeNode {
        id: bead.id.clone(),
        title: bead.title.clone(),
        children: children.into_iter().map(|c| build_tree_node(c, closure)).collect(),
    }
}
