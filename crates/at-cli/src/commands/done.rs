//! `at done [--status ...] [--issue id] [--cleanup-status ...] [--priority P]`
//! (§4.5/§6) — the completion protocol an ephemeral worker runs to close out
//! its current bead. Identifies the acting worker from `AT_RIG`/
//! `AT_POLECAT_NAME` in the environment; every other step delegates to
//! `at_agents::completion`'s free functions.

use at_agents::completion::{
    acceptance_criteria_met, detect_cleanup_status, ensure_merge_request_bead, gate_completed_path,
    polecat_done_mail, push_with_fallback, resolve_merge_strategy, write_checkpoint, write_done_intent,
};
use at_core::event_log::{append, EventLogEntry, EventType};
use at_core::repo::{AsyncGitJob, AsyncGitOps, RepoPath};
use at_core::types::{
    AgentLifecycleState, AgentRole, BeadType, CleanupStatus, ExitType, MergeStrategy, PolecatDoneBody,
};
use chrono::Utc;
use uuid::Uuid;

use crate::context::CliContext;

const DEFAULT_BRANCH: &str = "main";

pub struct DoneOptions {
    pub status: Option<String>,
    pub issue: Option<String>,
    pub cleanup_status: Option<String>,
    pub priority: Option<i32>,
}

pub async fn run(ctx: &CliContext, opts: DoneOptions) -> anyhow::Result<()> {
    let rig = std::env::var("AT_RIG")
        .map_err(|_| anyhow::anyhow!("not in a polecat workspace (AT_RIG unset)"))?;
    let name = std::env::var("AT_POLECAT_NAME")
        .map_err(|_| anyhow::anyhow!("not in a polecat workspace (AT_POLECAT_NAME unset)"))?;

    let mut identity = ctx
        .cache
        .get_identity_by_name(&rig, &name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no identity bead for {rig}/{name}"))?;
    if identity.role != AgentRole::Polecat {
        anyhow::bail!("done is only for ephemeral workers, {rig}/{name} is {:?}", identity.role);
    }

    let exit_type = match opts.status.as_deref() {
        Some(s) => ExitType::parse(s).ok_or_else(|| anyhow::anyhow!("unrecognized --status {s}"))?,
        None => ExitType::Completed,
    };

    let work_bead_id = opts
        .issue
        .clone()
        .or_else(|| identity.hook.clone())
        .ok_or_else(|| anyhow::anyhow!("no hooked bead and no --issue given"))?;
    let mut work_bead = ctx.bead_store.show(&work_bead_id).await?;
    if let Some(priority) = opts.priority {
        work_bead.priority = priority;
    }

    let worktree_path = std::env::current_dir()
        .ok()
        .filter(|p| p.join(".git").exists() || p.exists())
        .unwrap_or_else(|| std::path::Path::new(&ctx.pool_dir()).join("polecats").join(&name));
    let repo = RepoPath::from_workdir(&worktree_path)?;

    let branch_job = AsyncGitOps::current_branch(&repo).wait().await?;
    let branch = branch_job.stdout.trim().to_string();

    let cleanup_status = match opts.cleanup_status.as_deref() {
        Some("clean") => CleanupStatus::Clean,
        Some("uncommitted") => CleanupStatus::Uncommitted,
        Some("stash") => CleanupStatus::Stash,
        Some("unpushed") => CleanupStatus::Unpushed,
        Some("unknown") => CleanupStatus::Unknown,
        Some(other) => anyhow::bail!("unrecognized --cleanup-status {other}"),
        None => detect_cleanup_status(&repo).await?,
    };

    write_done_intent(&mut work_bead, exit_type);
    ctx.bead_store.create(work_bead.clone()).await?;

    let mut errors = Vec::new();
    let mut mr_id = None;
    let mut push_failed = false;
    let mut mr_failed = false;

    if exit_type == ExitType::Completed {
        let ahead = AsyncGitJob::spawn(
            &repo,
            vec!["rev-list".into(), "--count".into(), format!("{DEFAULT_BRANCH}..HEAD")],
            "git rev-list --count",
        )
        .wait()
        .await?;
        let commits_ahead: u32 = ahead.stdout.trim().parse().unwrap_or(0);

        gate_completed_path(&branch, DEFAULT_BRANCH, cleanup_status, commits_ahead)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let strategy = resolve_merge_strategy(&work_bead, None);
        match strategy {
            MergeStrategy::Local => {}
            MergeStrategy::Direct => {
                if let Err(e) = AsyncGitOps::push(&repo, "origin", DEFAULT_BRANCH, false).wait().await {
                    push_failed = true;
                    errors.push(e.to_string());
                } else {
                    write_checkpoint(&mut work_bead, "pushed", "true");
                }
            }
            MergeStrategy::Mr => match push_with_fallback(&repo, "origin", &branch).await {
                Ok(()) => {
                    write_checkpoint(&mut work_bead, "pushed", "true");
                    match ensure_merge_request_bead(&ctx.cache, &work_bead, &branch, || {
                        format!("gt-mr-{}", Uuid::new_v4())
                    })
                    .await
                    {
                        Ok(mr) => {
                            identity.active_mr = Some(mr.id.clone());
                            mr_id = Some(mr.id);
                            write_checkpoint(&mut work_bead, "mr-created", "true");
                        }
                        Err(e) => {
                            mr_failed = true;
                            errors.push(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    push_failed = true;
                    errors.push(e.to_string());
                }
            },
        }
        ctx.bead_store.create(work_bead.clone()).await?;
    }

    let body = PolecatDoneBody {
        exit_type,
        bead_id: work_bead.id.clone(),
        mr_id: mr_id.clone(),
        branch: Some(branch.clone()),
        convoy: None,
        push_failed,
        mr_failed,
        errors: errors.clone(),
    };
    let _mail = polecat_done_mail(&identity.id, &format!("{rig}-witness"), body.clone());
    let event_log_path = std::path::Path::new(&ctx.pool_dir())
        .join(".auto-tundra")
        .join(format!("{rig}-events.jsonl"));
    if let Some(parent) = event_log_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    if let Err(e) = append(
        &event_log_path,
        &EventLogEntry::new(EventType::Done, &name, serde_json::to_value(&body)?),
    ) {
        tracing::warn!(error = %e, "failed to append done event, witness notification skipped");
    }
    write_checkpoint(&mut work_bead, "witness-notified", "true");
    ctx.bead_store.create(work_bead.clone()).await?;

    let can_close = exit_type == ExitType::Completed && acceptance_criteria_met(&work_bead);
    if can_close {
        if let Some(parent_id) = work_bead.parent.clone() {
            if let Ok(parent) = ctx.bead_store.show(&parent_id).await {
                if parent.bead_type == BeadType::Molecule {
                    ctx.bead_store.close(&parent_id, false, Some("completed")).await?;
                }
            }
        }
        ctx.bead_store.close(&work_bead.id, false, None).await?;
        identity.state = AgentLifecycleState::Idle;
    } else {
        if exit_type == ExitType::Completed {
            tracing::warn!(bead = %work_bead.id, "acceptance criteria unmet, leaving bead open for review");
        }
        identity.state = if exit_type == ExitType::Escalated {
            AgentLifecycleState::Stuck
        } else {
            AgentLifecycleState::Idle
        };
    }
    identity.hook = None;
    identity.cleanup_status = CleanupStatus::Clean;
    identity.updated_at = Utc::now();
    ctx.cache.upsert_identity(&identity).await?;

    println!("{} -> {}", work_bead.id, exit_type.as_label_str());
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("warning: {e}");
        }
    }
    Ok(())
}
