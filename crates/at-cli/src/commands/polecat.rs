//! `at polecat {list|status|git-state|check-recovery|nuke|stale|prune|gc}`
//! (§4.4/§6) — ephemeral worker slot introspection and reclamation.
//!
//! A slot's cleanup status in the identity bead is agent-observed and
//! authoritative; this CLI can only read it (or, for `git-state`, run a
//! local scan of the worktree as a fallback). `nuke` issued from here has no
//! live `PtyHandle` — the process that spawned the slot may be long gone —
//! so it runs the same safety gate and worktree removal the lifecycle
//! controller's 6-step sequence does, but skips the PTY-kill step, logging
//! and continuing per the nuke sequence's own non-fatal-step policy.

use std::path::Path;

use at_agents::completion::detect_cleanup_status;
use at_core::repo::RepoPath;
use at_core::types::{AgentLifecycleState, CleanupStatus, RecoveryVerdict};
use at_core::worktree::WorktreeManager;
use chrono::Utc;

use crate::context::{split_addr, CliContext};

pub async fn list(ctx: &CliContext, rig: &str) -> anyhow::Result<()> {
    let identities = ctx.cache.list_identities_by_rig(rig).await?;
    if identities.is_empty() {
        println!("(no polecats on {rig})");
        return Ok(());
    }
    for identity in identities {
        println!(
            "{}/{:<16} {:<10} cleanup={:<12} hook={}",
            identity.rig,
            identity.name,
            format!("{:?}", identity.state).to_lowercase(),
            format!("{:?}", identity.cleanup_status).to_lowercase(),
            identity.hook.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn find(ctx: &CliContext, addr: &str) -> anyhow::Result<at_core::types::AgentIdentity> {
    let (rig, name) = split_addr(addr)?;
    ctx.cache
        .get_identity_by_name(rig, name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no polecat at {addr}"))
}

fn polecat_worktree_path(ctx: &CliContext, name: &str) -> std::path::PathBuf {
    Path::new(&ctx.pool_dir()).join("polecats").join(name)
}

pub async fn status(ctx: &CliContext, addr: &str) -> anyhow::Result<()> {
    let identity = find(ctx, addr).await?;
    println!("id:       {}", identity.id);
    println!("role:     {:?}", identity.role);
    println!("state:    {:?}", identity.state);
    println!("cleanup:  {:?}", identity.cleanup_status);
    println!("hook:     {}", identity.hook.as_deref().unwrap_or("-"));
    println!("active_mr:{}", identity.active_mr.as_deref().unwrap_or("-"));
    println!("updated:  {}", identity.updated_at.to_rfc3339());
    Ok(())
}

pub async fn git_state(ctx: &CliContext, addr: &str) -> anyhow::Result<()> {
    let (_, name) = split_addr(addr)?;
    let path = polecat_worktree_path(ctx, name);
    if !path.exists() {
        anyhow::bail!("no worktree at {}", path.display());
    }
    let repo = RepoPath::from_workdir(&path)?;
    let status = detect_cleanup_status(&repo).await?;
    println!("{status:?}");
    Ok(())
}

pub async fn check_recovery(ctx: &CliContext, addr: &str) -> anyhow::Result<()> {
    let identity = find(ctx, addr).await?;
    let lifecycle = ctx.lifecycle();
    let verdict = lifecycle.safety_gate(identity.cleanup_status);
    println!("{verdict:?}");
    if verdict != RecoveryVerdict::SafeToNuke {
        std::process::exit(1);
    }
    Ok(())
}

/// `nuke <addr...>` — one or more slots, best-effort each, continuing past
/// individual failures the way the nuke sequence itself does.
pub async fn nuke(ctx: &CliContext, addrs: &[String], force: bool) -> anyhow::Result<()> {
    let mut any_failed = false;
    for addr in addrs {
        if let Err(e) = nuke_one(ctx, addr, force).await {
            eprintln!("{addr}: {e}");
            any_failed = true;
        } else {
            println!("{addr}: nuked");
        }
    }
    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn nuke_one(ctx: &CliContext, addr: &str, force: bool) -> anyhow::Result<()> {
    let (rig, name) = split_addr(addr)?;
    let mut identity = find(ctx, addr).await?;

    let lifecycle = ctx.lifecycle();
    let verdict = lifecycle.safety_gate(identity.cleanup_status);
    if verdict != RecoveryVerdict::SafeToNuke && !force {
        anyhow::bail!("not safe to nuke ({verdict:?}); rerun with --force to override");
    }

    let path = polecat_worktree_path(ctx, name);
    if path.exists() {
        if let Err(e) = WorktreeManager::delete_worktree(&path.display().to_string(), &ctx.pool_dir()) {
            tracing::warn!(rig, name, error = %e, "worktree removal failed during cli nuke, continuing");
        }
    }

    identity.hook = None;
    identity.active_mr = None;
    identity.state = AgentLifecycleState::Nuked;
    identity.updated_at = Utc::now();
    ctx.cache.upsert_identity(&identity).await?;
    Ok(())
}

pub async fn stale(ctx: &CliContext, rig: &str) -> anyhow::Result<()> {
    let max_age = std::time::Duration::from_secs(ctx.config.agents.heartbeat_interval_secs * 2);
    let monitor = at_daemon::heartbeat::HeartbeatMonitor::new(max_age);
    let stale = monitor.check_rig(&ctx.cache, rig).await?;
    if stale.is_empty() {
        println!("(no stale polecats on {rig})");
        return Ok(());
    }
    for agent in stale {
        println!("{}/{} stale for {:?}", agent.rig, agent.name, agent.duration_since);
    }
    Ok(())
}

/// `prune <rig>` — nuke every slot this rig has that is both stale and safe
/// to reclaim without `--force` (a conservative, always-safe batch nuke).
pub async fn prune(ctx: &CliContext, rig: &str) -> anyhow::Result<()> {
    let identities = ctx.cache.list_identities_by_rig(rig).await?;
    let lifecycle = ctx.lifecycle();
    let max_age = std::time::Duration::from_secs(ctx.config.agents.heartbeat_interval_secs * 2);
    let now = Utc::now();

    let mut pruned = 0usize;
    for identity in identities {
        if identity.state == AgentLifecycleState::Nuked {
            continue;
        }
        let stale = lifecycle.is_stale(&identity, now, max_age);
        let verdict = lifecycle.safety_gate(identity.cleanup_status);
        if !stale || verdict != RecoveryVerdict::SafeToNuke {
            continue;
        }
        let addr = format!("{}/{}", identity.rig, identity.name);
        if let Err(e) = nuke_one(ctx, &addr, false).await {
            eprintln!("{addr}: {e}");
            continue;
        }
        println!("{addr}: pruned");
        pruned += 1;
    }
    if pruned == 0 {
        println!("(nothing to prune on {rig})");
    }
    Ok(())
}

/// `gc <rig>` — remove local state for slots already marked `nuked` whose
/// worktree directory is still present (the 6-step sequence treats worktree
/// removal as essential but this covers slots nuked by a process that died
/// mid-sequence).
pub async fn gc(ctx: &CliContext, rig: &str) -> anyhow::Result<()> {
    let identities = ctx.cache.list_identities_by_rig(rig).await?;
    let mut collected = 0usize;
    for identity in identities {
        if identity.state != AgentLifecycleState::Nuked
            || identity.cleanup_status == CleanupStatus::Unknown
        {
            continue;
        }
        let path = polecat_worktree_path(ctx, &identity.name);
        if !path.exists() {
            continue;
        }
        if let Err(e) = WorktreeManager::delete_worktree(&path.display().to_string(), &ctx.pool_dir()) {
            eprintln!("{}/{}: worktree removal failed: {e}", identity.rig, identity.name);
            continue;
        }
        println!("{}/{}: worktree removed", identity.rig, identity.name);
        collected += 1;
    }
    if collected == 0 {
        println!("(nothing to gc on {rig})");
    }
    Ok(())
}
