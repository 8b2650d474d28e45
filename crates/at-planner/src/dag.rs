//! Execution DAG construction (§4.2.3) and cycle detection (§4.2.4).

use std::collections::{HashMap, HashSet};

use at_core::types::{Bead, BeadStatus, BeadType, DepKind};

use crate::collect::BeadClosure;

#[derive(Debug, Clone)]
pub struct DagNode {
    pub id: String,
    pub title: String,
    pub bead_type: BeadType,
    pub status: BeadStatus,
    pub rig: Option<String>,
    /// Downstream nodes this one blocks.
    pub blocks: HashSet<String>,
    /// Upstream nodes blocking this one.
    pub blocked_by: HashSet<String>,
    pub parent: Option<String>,
    pub children: HashSet<String>,
}

impl DagNode {
    fn from_bead(bead: &Bead) -> Self {
        Self {
            id: bead.id.clone(),
            title: bead.title.clone(),
            bead_type: bead.bead_type,
            status: bead.status,
            rig: bead.rig.clone(),
            blocks: HashSet::new(),
            blocked_by: HashSet::new(),
            parent: bead.parent.clone(),
            children: bead.children.clone(),
        }
    }
}

/// Planner-owned execution graph, derived from a bead closure. `blocks` and
/// `blocked_by` are always symmetric mirrors of each other; parent/child
/// links never contribute execution edges.
#[derive(Debug, Clone, Default)]
pub struct ExecutionDag {
    pub nodes: HashMap<String, DagNode>,
}

impl ExecutionDag {
    /// `blocks`, `conditional-blocks`, and `waits-for` dep kinds each create
    /// one execution edge, direction `depends_on.id blocks issue_id`.
    /// `parent-child` sets hierarchy only (already on the bead); `related`
    /// and `tracks` are ignored here.
    pub fn build(closure: &BeadClosure) -> Self {
        let mut nodes: HashMap<String, DagNode> = closure
            .beads
            .values()
            .map(|b| (b.id.clone(), DagNode::from_bead(b)))
            .collect();

        for dep in &closure.deps {
            match dep.kind {
                DepKind::Blocks | DepKind::ConditionalBlocks | DepKind::WaitsFor => {
                    let (blocker, blocked) = (&dep.depends_on, &dep.issue_id);
                    if let Some(n) = nodes.get_mut(blocker) {
                        n.blocks.insert(blocked.clone());
                    }
                    if let Some(n) = nodes.get_mut(blocked) {
                        n.blocked_by.insert(blocker.clone());
                    }
                }
                DepKind::ParentChild | DepKind::Related | DepKind::Tracks => {}
            }
        }

        Self { nodes }
    }

    /// Depth-first search with a recursion stack. On back-edge detection,
    /// returns the cycle as the recursion-stack slice from the first
    /// occurrence of the re-entered node to the stack end. `None` means
    /// acyclic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(PartialEq, Eq, Clone, Copy)]
        enum Mark {
            InStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        fn visit<'a>(
            id: &'a str,
            dag: &'a ExecutionDag,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            if let Some(Mark::Done) = marks.get(id) {
                return None;
            }
            if let Some(Mark::InStack) = marks.get(id) {
                let start = stack.iter().position(|s| s == id).unwrap_or(0);
                return Some(stack[start..].to_vec());
            }
            marks.insert(id, Mark::InStack);
            stack.push(id.to_string());
            if let Some(node) = dag.nodes.get(id) {
                for next in &node.blocks {
                    if let Some(cycle) = visit(next, dag, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            marks.insert(id, Mark::Done);
            None
        }

        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(cycle) = visit(id, self, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::BeadClosure;
    use at_core::types::{Bead, Dep};
    use std::collections::HashMap;

    fn bead(id: &str, bead_type: BeadType) -> Bead {
        Bead::new(id, id, bead_type)
    }

    #[test]
    fn blocks_dep_creates_symmetric_edge() {
        let beads: HashMap<String, Bead> = [
            ("gt-a".to_string(), bead("gt-a", BeadType::Task)),
            ("gt-b".to_string(), bead("gt-b", BeadType::Task)),
        ]
        .into_iter()
        .collect();
        let deps = vec![Dep {
            issue_id: "gt-b".to_string(),
            depends_on: "gt-a".to_string(),
            kind: DepKind::Blocks,
        }];
        let dag = ExecutionDag::build(&BeadClosure { beads, deps });
        assert!(dag.nodes["gt-a"].blocks.contains("gt-b"));
        assert!(dag.nodes["gt-b"].blocked_by.contains("gt-a"));
    }

    #[test]
    fn tracks_and_related_are_not_execution_edges() {
        let beads: HashMap<String, Bead> = [
            ("gt-a".to_string(), bead("gt-a", BeadType::Task)),
            ("gt-b".to_string(), bead("gt-b", BeadType::Task)),
        ]
        .into_iter()
        .collect();
        let deps = vec![
            Dep {
                issue_id: "gt-a".to_string(),
                depends_on: "gt-b".to_string(),
                kind: DepKind::Tracks,
            },
            Dep {
                issue_id: "gt-a".to_string(),
                depends_on: "gt-b".to_string(),
                kind: DepKind::Related,
            },
        ];
        let dag = ExecutionDag::build(&BeadClosure { beads, deps });
        assert!(dag.nodes["gt-a"].blocks.is_empty());
        assert!(dag.nodes["gt-b"].blocked_by.is_empty());
    }

    #[test]
    fn detects_simple_cycle() {
        let beads: HashMap<String, Bead> = [
            ("gt-a".to_string(), bead("gt-a", BeadType::Task)),
            ("gt-b".to_string(), bead("gt-b", BeadType::Task)),
        ]
        .into_iter()
        .collect();
        let deps = vec![
            Dep {
                issue_id: "gt-b".to_string(),
                depends_on: "gt-a".to_string(),
                kind: DepKind::Blocks,
            },
            Dep {
                issue_id: "gt-a".to_string(),
                depends_on: "gt-b".to_string(),
                kind: DepKind::Blocks,
            },
        ];
        let dag = ExecutionDag::build(&BeadClosure { beads, deps });
        let cycle = dag.find_cycle().unwrap();
        assert!(cycle.len() >= 2);
    }

    #[test]
    fn self_loop_returns_single_id() {
        let beads: HashMap<String, Bead> = [("gt-a".to_string(), bead("gt-a", BeadType::Task))]
            .into_iter()
            .collect();
        let deps = vec![Dep {
            issue_id: "gt-a".to_string(),
            depends_on: "gt-a".to_string(),
            kind: DepKind::Blocks,
        }];
        let dag = ExecutionDag::build(&BeadClosure { beads, deps });
        let cycle = dag.find_cycle().unwrap();
        assert_eq!(cycle, vec!["gt-a".to_string()]);
    }

    #[test]
    fn acyclic_dag_returns_none() {
        let beads: HashMap<String, Bead> = [
            ("gt-a".to_string(), bead("gt-a", BeadType::Task)),
            ("gt-b".to_string(), bead("gt-b", BeadType::Task)),
        ]
        .into_iter()
        .collect();
        let deps = vec![Dep {
            issue_id: "gt-b".to_string(),
            depends_on: "gt-a".to_string(),
            kind: DepKind::Blocks,
        }];
        let dag = ExecutionDag::build(&BeadClosure { beads, deps });
        assert!(dag.find_cycle().is_none());
    }
}
