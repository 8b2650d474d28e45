//! Table rendering (§4.2.8) and the two output modes (§4.2.7).

use serde::Serialize;

use crate::findings::{Finding, Severity};
use crate::stage::StagePlan;

const TITLE_VISIBLE_WIDTH: usize = 28;

/// Truncate to at most `max_chars` visible UTF-8 codepoints, appending an
/// ellipsis if anything was cut. Never splits a multi-byte codepoint —
/// truncation happens on `char` boundaries regardless of byte count.
pub fn truncate_utf8(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{truncated}\u{2026}")
}

#[derive(Debug, Serialize)]
pub struct JsonFinding {
    pub severity: &'static str,
    pub category: &'static str,
    pub bead_ids: Vec<String>,
    pub message: String,
    pub suggested_fix: Option<String>,
}

impl From<&Finding> for JsonFinding {
    fn from(f: &Finding) -> Self {
        Self {
            severity: match f.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            },
            category: f.category.as_str(),
            bead_ids: f.bead_ids.clone(),
            message: f.message.clone(),
            suggested_fix: f.suggested_fix.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonWave {
    pub number: usize,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonTreeNode {
    pub id: String,
    pub title: String,
    pub children: Vec<JsonTreeNode>,
}

#[derive(Debug, Serialize)]
pub struct JsonPlan {
    pub status: String,
    pub convoy_id: Option<String>,
    pub errors: Vec<JsonFinding>,
    pub warnings: Vec<JsonFinding>,
    pub waves: Vec<JsonWave>,
    pub tree: Vec<JsonTreeNode>,
}

/// Render the plan as `{status, convoy_id, errors[], warnings[], waves[],
/// tree[]}`. Errors are always part of this payload in JSON mode (unlike
/// human mode, where they go to a distinct error stream).
pub fn render_json(plan: &StagePlan) -> JsonPlan {
    JsonPlan {
        status: plan.status.as_str().to_string(),
        convoy_id: plan.convoy_id.clone(),
        errors: plan.findings.iter().filter(|f| f.is_error()).map(JsonFinding::from).collect(),
        warnings: plan.findings.iter().filter(|f| !f.is_error()).map(JsonFinding::from).collect(),
        waves: plan
            .waves
            .iter()
            .map(|w| JsonWave { number: w.number, tasks: w.tasks.clone() })
            .collect(),
        tree: plan.tree.clone(),
    }
}

/// Human-rendered DAG tree → wave table → findings. Errors are written to
/// the second element of the returned pair (the error stream); everything
/// else goes to the first (stdout).
pub fn render_human(plan: &StagePlan) -> (String, String) {
    let mut out = String::new();
    let mut err = String::new();

    out.push_str("plan\n");
    for node in &plan.tree {
        render_tree_node(node, 0, &mut out);
    }

    out.push('\n');
    out.push_str(&format!(
        "{:<12} {:<30} {:<12} blockers\n",
        "id", "title", "rig"
    ));
    for wave in &plan.waves {
        out.push_str(&format!("-- wave {} --\n", wave.number));
        for task_id in &wave.tasks {
            let row = plan.table_rows.iter().find(|r| &r.id == task_id);
            if let Some(row) = row {
                out.push_str(&format!(
                    "{:<12} {:<30} {:<12} {}\n",
                    row.id,
                    truncate_utf8(&row.title, TITLE_VISIBLE_WIDTH),
                    row.rig.as_deref().unwrap_or("-"),
                    row.blockers.join(", "),
                ));
            }
        }
    }

    let total_tasks: usize = plan.waves.iter().map(|w| w.tasks.len()).sum();
    let max_width = plan.waves.iter().map(|w| w.tasks.len()).max().unwrap_or(0);
    out.push_str(&format!(
        "\n{total_tasks} tasks, {} waves, max parallelism {max_width}\n",
        plan.waves.len()
    ));

    for finding in &plan.findings {
        let line = format!(
            "[{}] {}: {}\n",
            match finding.severity {
                Severity::Error => "error",
                Severity::Warning => "warn",
            },
            finding.category.as_str(),
            finding.message,
        );
        if finding.is_error() {
            err.push_str(&line);
        } else {
            out.push_str(&line);
        }
    }

    (out, err)
}

fn render_tree_node(node: &JsonTreeNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&format!("- {} {}\n", node.id, truncate_utf8(&node.title, TITLE_VISIBLE_WIDTH)));
    for child in &node.children {
        render_tree_node(child, depth + 1, out);
    }
}
