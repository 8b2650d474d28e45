//! Wave computation (§4.2.5).

use std::collections::{HashMap, HashSet};

use at_core::types::BeadStatus;
use thiserror::Error;

use crate::dag::ExecutionDag;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaveError {
    #[error("no slingable work in the restricted graph")]
    Empty,
    #[error("cycle among slingable nodes: {0:?}")]
    Cycle(Vec<String>),
}

/// An ordered (number, task ids) pair. Numbering starts at 1; ids within a
/// wave are sorted ascending for determinism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub number: usize,
    pub tasks: Vec<String>,
}

/// Restrict the DAG to slingable nodes, keeping non-slingable upstream
/// blockers as ghost predecessors that suppress readiness until closed.
/// A slingable node's wave is `1 + max(wave of its open slingable
/// blockers)`, or 1 if it has none. Closed blockers of any type never
/// constrain placement; an open non-slingable blocker (e.g. an open
/// decision bead) suppresses the node from ever entering a wave until it
/// closes.
pub fn compute_waves(dag: &ExecutionDag) -> Result<Vec<Wave>, WaveError> {
    let slingable: Vec<&String> = dag
        .nodes
        .values()
        .filter(|n| n.bead_type.is_slingable())
        .map(|n| &n.id)
        .collect();
    if slingable.is_empty() {
        return Err(WaveError::Empty);
    }

    let mut placed: HashMap<String, usize> = HashMap::new();
    let mut remaining: HashSet<String> = slingable.iter().map(|s| (*s).clone()).collect();
    let mut waves: Vec<Wave> = Vec::new();

    loop {
        let mut ready_this_round: Vec<(String, usize)> = Vec::new();
        for id in remaining.iter() {
            let node = &dag.nodes[id];
            let mut max_pred_wave = 0usize;
            let mut blocked = false;
            for b in &node.blocked_by {
                let Some(blocker) = dag.nodes.get(b) else {
                    continue;
                };
                if blocker.status == BeadStatus::Closed {
                    continue;
                }
                if blocker.bead_type.is_slingable() {
                    match placed.get(b) {
                        Some(w) => max_pred_wave = max_pred_wave.max(*w),
                        None => {
                            blocked = true;
                            break;
                        }
                    }
                } else {
                    // Open non-slingable blocker (e.g. an open decision
                    // bead): ghost predecessor, suppresses readiness.
                    blocked = true;
                    break;
                }
            }
            if !blocked {
                ready_this_round.push((id.clone(), max_pred_wave + 1));
            }
        }

        if ready_this_round.is_empty() {
            break;
        }

        // All nodes ready in the same fixpoint pass share a wave number
        // only if their computed wave matches; otherwise place by computed
        // wave directly so predecessors always land strictly earlier.
        let mut by_wave: HashMap<usize, Vec<String>> = HashMap::new();
        for (id, w) in &ready_this_round {
            by_wave.entry(*w).or_default().push(id.clone());
        }
        let mut wave_numbers: Vec<usize> = by_wave.keys().copied().collect();
        wave_numbers.sort();
        for w in wave_numbers {
            let mut tasks = by_wave.remove(&w).unwrap();
            tasks.sort();
            for t in &tasks {
                placed.insert(t.clone(), w);
                remaining.remove(t);
            }
            waves.push(Wave { number: w, tasks });
        }
    }

    // Anything left over the fixpoint couldn't place is either (a)
    // perpetually suppressed by an open non-slingable ghost predecessor —
    // legitimate, simply excluded from the plan — or (b) mutually blocked
    // by other still-remaining slingable nodes, which can only happen if a
    // cycle slipped past §4.2.4's full-graph check.
    let mut stuck: Vec<String> = Vec::new();
    for id in &remaining {
        let node = &dag.nodes[id];
        let ghost_blocked = node.blocked_by.iter().any(|b| {
            dag.nodes
                .get(b)
                .map(|blocker| {
                    blocker.status != BeadStatus::Closed && !blocker.bead_type.is_slingable()
                })
                .unwrap_or(false)
        });
        if !ghost_blocked {
            stuck.push(id.clone());
        }
    }
    if !stuck.is_empty() {
        stuck.sort();
        return Err(WaveError::Cycle(stuck));
    }

    waves.sort_by_key(|w| w.number);
    Ok(waves)
}
