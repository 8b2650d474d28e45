//! `at sling <bead>|<epic>|<convoy> [<rig>]` (§4.3/§6) — dispatch work into a
//! rig, directly (scheduler transparent, this command spawns inline) or
//! deferred (enqueued as a context bead for the daemon's own dispatch loop).

use at_agents::worker_lifecycle::ShellAgentRuntime;
use at_core::types::BeadStatus;
use at_planner::collect::collect;
use at_planner::input::resolve;
use uuid::Uuid;

use crate::context::CliContext;

pub async fn run(ctx: &CliContext, target: &str, rig: Option<String>) -> anyhow::Result<()> {
    let bead = ctx.bead_store.show(target).await?;
    let is_epic_target = bead.bead_type == at_core::types::BeadType::Epic;
    let is_convoy_target = bead.bead_type == at_core::types::BeadType::Convoy;

    let stage_input = resolve(&[target.to_string()], |_| is_epic_target, |_| is_convoy_target)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let closure = collect(&ctx.bead_store, &stage_input)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut targets: Vec<_> = closure
        .beads
        .values()
        .filter(|b| b.bead_type.is_slingable() && b.status != BeadStatus::Closed)
        .cloned()
        .collect();
    targets.sort_by(|a, b| a.id.cmp(&b.id));

    if targets.is_empty() {
        anyhow::bail!("no slingable work found under {target}");
    }

    let scheduler = ctx.scheduler();
    let default_branch = "main";

    if scheduler.is_deferred() {
        for work_bead in &targets {
            let target_rig = rig
                .clone()
                .or_else(|| work_bead.rig.clone())
                .ok_or_else(|| anyhow::anyhow!("{} has no rig and none was given", work_bead.id))?;
            let context_id = scheduler.enqueue(&work_bead.id, &target_rig, None).await?;
            println!("{} -> {context_id} (queued on {target_rig})", work_bead.id);
        }
        return Ok(());
    }

    let lifecycle = scheduler.lifecycle();
    let runtime = ShellAgentRuntime {
        command: ctx.config.agents.launch_command.clone(),
        args: ctx.config.agents.launch_args.clone(),
    };
    for work_bead in &targets {
        let target_rig = rig
            .clone()
            .or_else(|| work_bead.rig.clone())
            .ok_or_else(|| anyhow::anyhow!("{} has no rig and none was given", work_bead.id))?;
        let slot_name = format!("polecat-{}", &Uuid::new_v4().to_string()[..8]);
        let mut slot = lifecycle
            .spawn(
                &target_rig,
                &slot_name,
                default_branch,
                || format!("gt-agent-{}", Uuid::new_v4()),
                &runtime,
            )
            .await?;
        ctx.bead_store
            .update(&work_bead.id, |b| b.status = BeadStatus::Hooked)
            .await?;
        slot.identity.hook = Some(work_bead.id.clone());
        ctx.cache.upsert_identity(&slot.identity).await?;
        println!("{} -> {} ({target_rig}, spawned)", work_bead.id, slot.identity.name);
    }
    Ok(())
}
