//! Stage findings (§4.2.6) — errors abort staging, warnings annotate.

use std::collections::HashMap;

use crate::dag::ExecutionDag;
use crate::input::StageInput;
use crate::waves::Wave;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Cycle,
    NoRig,
    Orphan,
    BlockedRig,
    MissingBranch,
    CrossRig,
    Capacity,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cycle => "cycle",
            Category::NoRig => "no-rig",
            Category::Orphan => "orphan",
            Category::BlockedRig => "blocked-rig",
            Category::MissingBranch => "missing-branch",
            Category::CrossRig => "cross-rig",
            Category::Capacity => "capacity",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub category: Category,
    pub bead_ids: Vec<String>,
    pub message: String,
    pub suggested_fix: Option<String>,
}

impl Finding {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// A rig's current dispatch-availability state. `parked`/`docked` pools are
/// not currently accepting work; detected via a pluggable predicate so
/// tests can stub arbitrary rig states without a live scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigPoolState {
    Active,
    Parked,
    Docked,
}

pub trait RigStatusProvider {
    fn status(&self, rig: &str) -> RigPoolState;
    /// True if the rig's integration branch exists yet (relevant only for
    /// sub-epic inputs — §4.2.6's `missing-branch` finding).
    fn has_branch(&self, _rig: &str) -> bool {
        true
    }
}

/// Default provider: every rig is active and every branch exists. Used
/// where no pool-state/branch integration is wired in (plain task-list
/// staging, most tests).
pub struct AlwaysActive;

impl RigStatusProvider for AlwaysActive {
    fn status(&self, _rig: &str) -> RigPoolState {
        RigPoolState::Active
    }
}

const DEFAULT_CAPACITY_THRESHOLD: usize = 8;

/// Run every §4.2.6 detector over the DAG and computed waves. `is_epic_input`
/// controls orphan detection (task-list input suppresses it).
pub fn collect_findings(
    dag: &ExecutionDag,
    cycle: Option<&[String]>,
    waves: &[Wave],
    input: &StageInput,
    rig_status: &dyn RigStatusProvider,
    capacity_threshold: Option<usize>,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    if let Some(cycle_ids) = cycle {
        findings.push(Finding {
            severity: Severity::Error,
            category: Category::Cycle,
            bead_ids: cycle_ids.to_vec(),
            message: format!("cycle detected: {}", cycle_ids.join(" -> ")),
            suggested_fix: Some("break the cycle by removing or re-ordering one blocking dep".to_string()),
        });
    }

    let slingable_ids: Vec<&String> = dag
        .nodes
        .values()
        .filter(|n| n.bead_type.is_slingable())
        .map(|n| &n.id)
        .collect();

    // no-rig
    for id in &slingable_ids {
        let node = &dag.nodes[*id];
        if node.rig.is_none() {
            findings.push(Finding {
                severity: Severity::Error,
                category: Category::NoRig,
                bead_ids: vec![node.id.clone()],
                message: format!("{} has no worker-pool assignment", node.id),
                suggested_fix: Some("assign a rig before staging".to_string()),
            });
        }
    }

    // orphan: epic input only, degree-0 nodes in the execution graph
    if matches!(input, StageInput::Epic(_)) {
        for id in &slingable_ids {
            let node = &dag.nodes[*id];
            if node.blocks.is_empty() && node.blocked_by.is_empty() {
                findings.push(Finding {
                    severity: Severity::Warning,
                    category: Category::Orphan,
                    bead_ids: vec![node.id.clone()],
                    message: format!("{} has no execution edges in or out", node.id),
                    suggested_fix: None,
                });
            }
        }
    }

    // blocked-rig
    for id in &slingable_ids {
        let node = &dag.nodes[*id];
        let Some(rig) = &node.rig else { continue };
        match rig_status.status(rig) {
            RigPoolState::Active => {}
            RigPoolState::Parked => findings.push(Finding {
                severity: Severity::Warning,
                category: Category::BlockedRig,
                bead_ids: vec![node.id.clone()],
                message: format!("{} is assigned to rig {rig}, which is parked", node.id),
                suggested_fix: Some(format!("unpark {rig} or reassign {}", node.id)),
            }),
            RigPoolState::Docked => findings.push(Finding {
                severity: Severity::Warning,
                category: Category::BlockedRig,
                bead_ids: vec![node.id.clone()],
                message: format!("{} is assigned to rig {rig}, which is docked", node.id),
                suggested_fix: Some(format!("undock {rig} or reassign {}", node.id)),
            }),
        }
    }

    // missing-branch: sub-epic nodes whose integration branch doesn't exist yet
    for node in dag.nodes.values() {
        if node.bead_type == at_core::types::BeadType::Epic {
            if let Some(rig) = &node.rig {
                if !rig_status.has_branch(rig) {
                    findings.push(Finding {
                        severity: Severity::Warning,
                        category: Category::MissingBranch,
                        bead_ids: vec![node.id.clone()],
                        message: format!("sub-epic {} has no integration branch on {rig} yet", node.id),
                        suggested_fix: Some("create the integration branch before dispatch".to_string()),
                    });
                }
            }
        }
    }

    // cross-rig: modal rig is "primary"; anything else is flagged
    if let Some(primary) = modal_rig(dag, &slingable_ids) {
        for id in &slingable_ids {
            let node = &dag.nodes[*id];
            if let Some(rig) = &node.rig {
                if rig != &primary {
                    findings.push(Finding {
                        severity: Severity::Warning,
                        category: Category::CrossRig,
                        bead_ids: vec![node.id.clone()],
                        message: format!("{} is on rig {rig}, off the plan's primary rig {primary}", node.id),
                        suggested_fix: Some(format!("reassign {} to {primary} or stage it separately", node.id)),
                    });
                }
            }
        }
    }

    // capacity: any wave with more slingable tasks than the threshold
    let threshold = capacity_threshold.unwrap_or(DEFAULT_CAPACITY_THRESHOLD);
    for wave in waves {
        if wave.tasks.len() > threshold {
            findings.push(Finding {
                severity: Severity::Warning,
                category: Category::Capacity,
                bead_ids: wave.tasks.clone(),
                message: format!(
                    "wave {} has {} slingable tasks, above the {threshold} threshold",
                    wave.number,
                    wave.tasks.len()
                ),
                suggested_fix: Some("split the wave across multiple stages".to_string()),
            });
        }
    }

    findings
}

fn modal_rig(dag: &ExecutionDag, slingable_ids: &[&String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in slingable_ids {
        if let Some(rig) = &dag.nodes[*id].rig {
            *counts.entry(rig.as_str()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(rig, _)| rig.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::BeadClosure;
    use at_core::types::{Bead, BeadType};
    use std::collections::HashMap as Map;

    fn task_on(id: &str, rig: Option<&str>) -> Bead {
        let mut b = Bead::new(id, id, BeadType::Task);
        b.rig = rig.map(|r| r.to_string());
        b
    }

    #[test]
    fn no_rig_fires_for_unassigned_slingable_node() {
        let beads: Map<String, Bead> = [("gt-a".to_string(), task_on("gt-a", None))].into_iter().collect();
        let dag = ExecutionDag::build(&BeadClosure { beads, deps: vec![] });
        let findings = collect_findings(
            &dag,
            None,
            &[],
            &StageInput::Tasks(vec!["gt-a".to_string()]),
            &AlwaysActive,
            None,
        );
        assert!(findings.iter().any(|f| f.category == Category::NoRig && f.is_error()));
    }

    #[test]
    fn orphan_only_fires_for_epic_input() {
        let beads: Map<String, Bead> = [("gt-a".to_string(), task_on("gt-a", Some("rigA")))]
            .into_iter()
            .collect();
        let dag = ExecutionDag::build(&BeadClosure { beads, deps: vec![] });

        let task_findings = collect_findings(
            &dag,
            None,
            &[],
            &StageInput::Tasks(vec!["gt-a".to_string()]),
            &AlwaysActive,
            None,
        );
        assert!(!task_findings.iter().any(|f| f.category == Category::Orphan));

        let epic_findings = collect_findings(
            &dag,
            None,
            &[],
            &StageInput::Epic("gt-epic".to_string()),
            &AlwaysActive,
            None,
        );
        assert!(epic_findings.iter().any(|f| f.category == Category::Orphan));
    }

    struct Stub;
    impl RigStatusProvider for Stub {
        fn status(&self, rig: &str) -> RigPoolState {
            if rig == "rigB" {
                RigPoolState::Parked
            } else {
                RigPoolState::Active
            }
        }
    }

    #[test]
    fn blocked_rig_names_the_parked_state() {
        let beads: Map<String, Bead> = [("gt-a".to_string(), task_on("gt-a", Some("rigB")))]
            .into_iter()
            .collect();
        let dag = ExecutionDag::build(&BeadClosure { beads, deps: vec![] });
        let findings = collect_findings(
            &dag,
            None,
            &[],
            &StageInput::Tasks(vec!["gt-a".to_string()]),
            &Stub,
            None,
        );
        let f = findings.iter().find(|f| f.category == Category::BlockedRig).unwrap();
        assert!(f.message.contains("parked"));
    }

    #[test]
    fn cross_rig_flags_non_modal_pool() {
        let beads: Map<String, Bead> = [
            ("gt-a".to_string(), task_on("gt-a", Some("rigA"))),
            ("gt-b".to_string(), task_on("gt-b", Some("rigA"))),
            ("gt-c".to_string(), task_on("gt-c", Some("rigB"))),
        ]
        .into_iter()
        .collect();
        let dag = ExecutionDag::build(&BeadClosure { beads, deps: vec![] });
        let findings = collect_findings(
            &dag,
            None,
            &[],
            &StageInput::Tasks(vec!["gt-a".to_string(), "gt-b".to_string(), "gt-c".to_string()]),
            &AlwaysActive,
            None,
        );
        let cross: Vec<&Finding> = findings.iter().filter(|f| f.category == Category::CrossRig).collect();
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0].bead_ids, vec!["gt-c".to_string()]);
    }
}
