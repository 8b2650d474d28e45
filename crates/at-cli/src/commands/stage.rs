//! `at stage <target> [--json]` (§4.2/§6) — plan, and on success materialize,
//! a staged convoy from an epic id, a convoy id, or a bare task list.

use at_planner::{render_human, render_json, AlwaysActive, StagePlanner};

use crate::context::CliContext;

pub async fn run(ctx: &CliContext, target: Vec<String>, json: bool) -> anyhow::Result<()> {
    let planner = StagePlanner::new(ctx.cache.clone());
    let plan = planner
        .stage(&target, &AlwaysActive, None)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&render_json(&plan))?);
        return Ok(());
    }

    let (out, err) = render_human(&plan);
    print!("{out}");
    if !err.is_empty() {
        eprint!("{err}");
    }

    if plan.status == at_planner::StageStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}
