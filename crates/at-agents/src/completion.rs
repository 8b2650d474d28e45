//! The completion protocol a polecat runs when it finishes its hooked bead
//! (spec §4.5): write intent and checkpoint labels as it progresses, push its
//! branch, create or update a merge-request bead, notify its rig's witness,
//! and transition back to idle.

use std::sync::Arc;

use at_core::cache::CacheDb;
use at_core::repo::{AsyncGitOps, RepoPath};
use at_core::types::{
    AgentIdentity, AgentLifecycleState, Bead, BeadStatus, BeadType, CleanupStatus, ExitType,
    MergeStrategy, Mail, PolecatDoneBody,
};
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("cache error: {0}")]
    Cache(#[from] tokio_rusqlite::Error),
    #[error("repo error: {0}")]
    Repo(#[from] at_core::repo::RepoError),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("push failed: {0}")]
    PushFailed(String),
    #[error("merge-request creation failed: {0}")]
    MRCreationFailed(String),
    #[error("safety blocked: {0}")]
    SafetyBlocked(String),
}

pub type Result<T> = std::result::Result<T, CompletionError>;

// ---------------------------------------------------------------------------
// Cleanup status auto-detection
// ---------------------------------------------------------------------------

/// Detect the worktree's cleanup status with priority: uncommitted changes
/// beat stashed changes beat unpushed commits beat clean.
pub async fn detect_cleanup_status(repo: &RepoPath) -> Result<CleanupStatus> {
    let status = AsyncGitOps::status(repo).wait().await?;
    if status.success() && !status.stdout.trim().is_empty() {
        return Ok(CleanupStatus::Uncommitted);
    }

    let stashes = AsyncGitOps::stash_list(repo).wait().await?;
    if stashes.success() && !stashes.stdout.trim().is_empty() {
        return Ok(CleanupStatus::Stash);
    }

    let unpushed = at_core::repo::AsyncGitJob::spawn(
        repo,
        vec!["rev-list".into(), "@{u}..HEAD".into()],
        "git rev-list @{u}..HEAD",
    )
    .wait()
    .await?;
    if !unpushed.success() {
        // No upstream configured at all -- treat as unpushed, not unknown,
        // since the branch is known to exist locally with commits.
        return Ok(CleanupStatus::Unpushed);
    }
    if !unpushed.stdout.trim().is_empty() {
        return Ok(CleanupStatus::Unpushed);
    }

    Ok(CleanupStatus::Clean)
}

// ---------------------------------------------------------------------------
// Preamble + checkpoints
// ---------------------------------------------------------------------------

/// Write the `done-intent:<exit-type>:<unix-ts>` label marking the start of
/// the completion protocol. Idempotent: re-running replaces any prior intent.
pub fn write_done_intent(bead: &mut Bead, exit_type: ExitType) {
    bead.labels
        .retain(|l| !l.starts_with("done-intent:"));
    bead.labels.insert(format!(
        "done-intent:{}:{}",
        exit_type.as_label_str(),
        Utc::now().timestamp()
    ));
}

/// Write a `done-cp:<stage>:<value>:<unix-ts>` checkpoint label, the state
/// machine described in spec.md's Design Notes (pushed -> mr-created ->
/// witness-notified).
pub fn write_checkpoint(bead: &mut Bead, stage: &str, value: &str) {
    bead.labels.insert(format!(
        "done-cp:{stage}:{value}:{}",
        Utc::now().timestamp()
    ));
}

// ---------------------------------------------------------------------------
// COMPLETED-path gates
// ---------------------------------------------------------------------------

/// Gate the COMPLETED exit path: the branch must not be the default branch,
/// there must be no uncommitted changes, and there must be commits ahead of
/// the base (an error naming something other than "clean" is raised
/// otherwise, matching spec.md §4.5.3).
pub fn gate_completed_path(
    branch: &str,
    default_branch: &str,
    cleanup_status: CleanupStatus,
    commits_ahead: u32,
) -> Result<()> {
    if branch == default_branch {
        return Err(CompletionError::PreconditionFailed(format!(
            "cannot complete on the default branch {default_branch}"
        )));
    }
    if cleanup_status == CleanupStatus::Uncommitted {
        return Err(CompletionError::PreconditionFailed(
            "uncommitted changes present; commit or stash before completing".into(),
        ));
    }
    if commits_ahead == 0 && cleanup_status != CleanupStatus::Clean {
        return Err(CompletionError::PreconditionFailed(
            "no commits ahead of base; nothing to complete".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Merge strategy resolution
// ---------------------------------------------------------------------------

/// Resolve the merge strategy for a bead: an explicit label wins, falling
/// back to the convoy's recorded strategy, falling back to `Mr`.
pub fn resolve_merge_strategy(bead: &Bead, convoy_strategy: Option<MergeStrategy>) -> MergeStrategy {
    for label in &bead.labels {
        if let Some(s) = label.strip_prefix("merge-strategy:") {
            match s {
                "local" => return MergeStrategy::Local,
                "direct" => return MergeStrategy::Direct,
                "mr" => return MergeStrategy::Mr,
                _ => {}
            }
        }
    }
    convoy_strategy.unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Push with fallback + verification
// ---------------------------------------------------------------------------

/// Push the branch, trying `origin` with upstream tracking, then `origin`
/// without `-u`, then a plain `push` relying on an already-configured
/// upstream. Verifies the branch actually exists on the remote afterward.
pub async fn push_with_fallback(repo: &RepoPath, remote: &str, branch: &str) -> Result<()> {
    let attempts: [(bool, bool); 3] = [(true, true), (true, false), (false, false)];
    let mut last_err = String::new();

    for (use_remote, set_upstream) in attempts {
        let job = if use_remote {
            AsyncGitOps::push(repo, remote, branch, set_upstream)
        } else {
            at_core::repo::AsyncGitJob::spawn(repo, vec!["push".into()], "git push")
        };
        let result = job.wait().await?;
        if result.success() {
            let verify = AsyncGitOps::remote_branch_exists(repo, remote, branch)
                .wait()
                .await?;
            if verify.success() {
                return Ok(());
            }
            last_err = "push reported success but remote branch not found".to_string();
            continue;
        }
        last_err = result.stderr;
    }

    Err(CompletionError::PushFailed(last_err))
}

// ---------------------------------------------------------------------------
// Merge-request bead idempotent creation
// ---------------------------------------------------------------------------

/// Create the merge-request bead for a completed work bead, or return the
/// existing one if this polecat has already created it (idempotent via the
/// `mr-for:<work-bead-id>` label).
pub async fn ensure_merge_request_bead(
    cache: &CacheDb,
    work_bead: &Bead,
    branch: &str,
    id_for_new: impl FnOnce() -> String,
) -> Result<Bead> {
    let label = format!("mr-for:{}", work_bead.id);
    for candidate in cache.list_beads_by_type(BeadType::MergeRequest).await? {
        if candidate.has_label(&label) {
            let readback = cache
                .get_bead(&candidate.id)
                .await?
                .ok_or_else(|| CompletionError::MRCreationFailed("read-back failed".into()))?;
            return Ok(readback);
        }
    }

    let mut mr = Bead::new(id_for_new(), format!("Merge {}", work_bead.title), BeadType::MergeRequest);
    mr.labels.insert(label);
    mr.labels.insert(format!("branch:{branch}"));
    mr.rig = work_bead.rig.clone();
    cache.upsert_bead(&mr).await?;

    let readback = cache
        .get_bead(&mr.id)
        .await?
        .ok_or_else(|| CompletionError::MRCreationFailed("read-back failed after create".into()))?;
    Ok(readback)
}

// ---------------------------------------------------------------------------
// Acceptance-criteria gate
// ---------------------------------------------------------------------------

/// A bead may only be closed by the completion protocol once every
/// `acceptance:` label present on it has a matching `done-cp:accepted:<name>`
/// checkpoint recording it was satisfied.
pub fn acceptance_criteria_met(bead: &Bead) -> bool {
    let checkpoints = bead.checkpoints();
    bead.labels
        .iter()
        .filter_map(|l| l.strip_prefix("acceptance:"))
        .all(|criterion| {
            checkpoints
                .get("accepted")
                .map(|(value, _)| value == criterion || value == "all")
                .unwrap_or(false)
        })
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Send the `POLECAT_DONE` notification to the rig's witness.
pub fn polecat_done_mail(from_agent: &str, to_agent: &str, body: PolecatDoneBody) -> Mail {
    Mail {
        id: uuid::Uuid::new_v4(),
        from_agent: from_agent.to_string(),
        to_agent: to_agent.to_string(),
        subject: "POLECAT_DONE".to_string(),
        body: serde_json::to_string(&body).unwrap_or_default(),
        created_at: Utc::now(),
        read: false,
    }
}

// ---------------------------------------------------------------------------
// Transition to idle
// ---------------------------------------------------------------------------

/// Transition a polecat identity back to `idle` once the completion protocol
/// has finished: clear its hook and active-mr fields, and close the work
/// bead's molecule (if any) before closing the bead itself.
pub async fn transition_to_idle(
    cache: &CacheDb,
    identity: &mut AgentIdentity,
    work_bead: &mut Bead,
    molecule: Option<&mut Bead>,
) -> Result<()> {
    if let Some(molecule) = molecule {
        molecule.status = BeadStatus::Closed;
        molecule.updated_at = Utc::now();
        cache.upsert_bead(molecule).await?;
    }

    work_bead.status = BeadStatus::Closed;
    work_bead.updated_at = Utc::now();
    cache.upsert_bead(work_bead).await?;

    identity.hook = None;
    identity.active_mr = None;
    identity.state = AgentLifecycleState::Idle;
    identity.cleanup_status = CleanupStatus::Clean;
    identity.updated_at = Utc::now();
    cache.upsert_identity(identity).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_done_intent_replaces_prior_label() {
        let mut bead = Bead::new("gt-001", "t", BeadType::Task);
        bead.labels.insert("done-intent:deferred:100".into());
        write_done_intent(&mut bead, ExitType::Completed);
        let intents: Vec<_> = bead
            .labels
            .iter()
            .filter(|l| l.starts_with("done-intent:"))
            .collect();
        assert_eq!(intents.len(), 1);
        assert!(intents[0].starts_with("done-intent:completed:"));
    }

    #[test]
    fn gate_completed_path_rejects_default_branch() {
        let err = gate_completed_path("main", "main", CleanupStatus::Clean, 3);
        assert!(err.is_err());
    }

    #[test]
    fn gate_completed_path_rejects_uncommitted() {
        let err = gate_completed_path("feature", "main", CleanupStatus::Uncommitted, 3);
        assert!(err.is_err());
    }

    #[test]
    fn gate_completed_path_rejects_zero_commits_ahead_when_not_clean() {
        let err = gate_completed_path("feature", "main", CleanupStatus::Unpushed, 0);
        assert!(err.is_err());
    }

    #[test]
    fn gate_completed_path_allows_zero_commits_ahead_when_clean() {
        assert!(gate_completed_path("feature", "main", CleanupStatus::Clean, 0).is_ok());
    }

    #[test]
    fn gate_completed_path_passes_with_clean_ahead() {
        assert!(gate_completed_path("feature", "main", CleanupStatus::Clean, 1).is_ok());
    }

    #[test]
    fn resolve_merge_strategy_prefers_label() {
        let mut bead = Bead::new("gt-001", "t", BeadType::Task);
        bead.labels.insert("merge-strategy:direct".into());
        assert_eq!(
            resolve_merge_strategy(&bead, Some(MergeStrategy::Mr)),
            MergeStrategy::Direct
        );
    }

    #[test]
    fn resolve_merge_strategy_falls_back_to_convoy_then_default() {
        let bead = Bead::new("gt-001", "t", BeadType::Task);
        assert_eq!(
            resolve_merge_strategy(&bead, Some(MergeStrategy::Local)),
            MergeStrategy::Local
        );
        assert_eq!(resolve_merge_strategy(&bead, None), MergeStrategy::Mr);
    }

    #[test]
    fn acceptance_criteria_met_requires_matching_checkpoint() {
        let mut bead = Bead::new("gt-001", "t", BeadType::Task);
        bead.labels.insert("acceptance:tests-pass".into());
        assert!(!acceptance_criteria_met(&bead));
        bead.labels
            .insert("done-cp:accepted:tests-pass:100".into());
        assert!(acceptance_criteria_met(&bead));
    }

    #[tokio::test]
    async fn ensure_merge_request_bead_is_idempotent() {
        let cache = CacheDb::new_in_memory().await.unwrap();
        let work = Bead::new("gt-001", "do the thing", BeadType::Task);
        let mut counter = 0;
        let first = ensure_merge_request_bead(&cache, &work, "polecat/a-1", || {
            counter += 1;
            format!("gt-mr-{counter}")
        })
        .await
        .unwrap();
        let second = ensure_merge_request_bead(&cache, &work, "polecat/a-1", || {
            counter += 1;
            format!("gt-mr-{counter}")
        })
        .await
        .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(counter, 1);
    }
}
