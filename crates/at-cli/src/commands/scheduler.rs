//! `at scheduler {list|status|run [--dry-run] [--batch N]}` (§4.3.4/§6).

use at_agents::worker_lifecycle::ShellAgentRuntime;

use crate::context::CliContext;

pub async fn list(ctx: &CliContext) -> anyhow::Result<()> {
    let scheduler = ctx.scheduler();
    let items = scheduler.list().await?;
    if items.is_empty() {
        println!("(queue empty)");
        return Ok(());
    }
    for item in items {
        println!(
            "{:<20} work={:<20} rig={:<12} {}",
            item.context_bead_id,
            item.block.work_bead,
            item.block.target_rig,
            if item.blocked { "blocked" } else { "ready" },
        );
    }
    Ok(())
}

pub async fn status(ctx: &CliContext) -> anyhow::Result<()> {
    let scheduler = ctx.scheduler();
    let status = scheduler.status().await?;
    println!("queued: {} ({} ready)", status.queued_total, status.queued_ready);
    Ok(())
}

pub async fn run(ctx: &CliContext, dry_run: bool, batch: Option<usize>) -> anyhow::Result<()> {
    let mut config = ctx.config.scheduler.clone();
    if let Some(batch) = batch {
        config.batch_size = batch;
    }
    let scheduler = at_daemon::scheduler::CapacityScheduler::new(
        ctx.cache.clone(),
        std::sync::Arc::new(ctx.lifecycle()),
        config,
    );

    if !scheduler.is_deferred() {
        println!("scheduler is in direct-dispatch mode (max_polecats <= 0); nothing to run");
        return Ok(());
    }

    if dry_run {
        let items = scheduler.list().await?;
        println!(
            "dry-run: {} queued context bead(s) would be considered this pass",
            items.len()
        );
        return Ok(());
    }

    let runtime = ShellAgentRuntime {
        command: ctx.config.agents.launch_command.clone(),
        args: ctx.config.agents.launch_args.clone(),
    };
    let report = scheduler.dispatch("main", &runtime).await?;
    println!(
        "dispatched={} left_blocked={} failed={} circuit_tripped={} cleaned_invalid={} cleaned_stale={}",
        report.dispatched.len(),
        report.left_blocked.len(),
        report.failed.len(),
        report.circuit_tripped.len(),
        report.cleaned_invalid,
        report.cleaned_stale,
    );
    Ok(())
}
