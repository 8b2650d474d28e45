use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Bead id / routing
// ---------------------------------------------------------------------------

/// Extract the routing prefix from a bead id, e.g. `"gt-001"` -> `"gt"`.
///
/// Ids with no `-` have no routing prefix and resolve to the town's default
/// store; callers should treat that as a degenerate case, not an error.
pub fn routing_prefix(id: &str) -> &str {
    match id.find('-') {
        Some(idx) => &id[..idx],
        None => id,
    }
}

/// A bead id that may live in a different physical store than the one
/// currently being queried. The routes table is the only way to resolve
/// these; callers must never assume "all beads live here".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadRef {
    Local(String),
    External { prefix: String, id: String },
}

impl BeadRef {
    /// Parse `"external:<prefix>:<id>"` or a bare local id.
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("external:") {
            if let Some((prefix, id)) = rest.split_once(':') {
                return BeadRef::External {
                    prefix: prefix.to_string(),
                    id: id.to_string(),
                };
            }
        }
        BeadRef::Local(raw.to_string())
    }

    pub fn encode(&self) -> String {
        match self {
            BeadRef::Local(id) => id.clone(),
            BeadRef::External { prefix, id } => format!("external:{prefix}:{id}"),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BeadRef::Local(id) => id,
            BeadRef::External { id, .. } => id,
        }
    }
}

// ---------------------------------------------------------------------------
// BeadType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadType {
    Epic,
    Task,
    Bug,
    Feature,
    Chore,
    Decision,
    Convoy,
    MergeRequest,
    Agent,
    Message,
    Molecule,
    Slot,
}

impl BeadType {
    /// Types that can execute as units of work scheduled to a worker pool.
    pub fn is_slingable(&self) -> bool {
        matches!(
            self,
            BeadType::Task | BeadType::Bug | BeadType::Feature | BeadType::Chore
        )
    }

    /// Structural container types: not slingable, not internal machinery.
    pub fn is_structural(&self) -> bool {
        matches!(self, BeadType::Epic | BeadType::Decision)
    }
}

// ---------------------------------------------------------------------------
// BeadStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Closed,
    Hooked,
    StagedReady,
    StagedWarnings,
}

impl BeadStatus {
    pub fn is_staged(&self) -> bool {
        matches!(self, BeadStatus::StagedReady | BeadStatus::StagedWarnings)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, BeadStatus::Closed)
    }
}

// ---------------------------------------------------------------------------
// DepKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepKind {
    Blocks,
    ConditionalBlocks,
    WaitsFor,
    ParentChild,
    Related,
    Tracks,
}

impl DepKind {
    /// `blocks`, `conditional-blocks`, and `waits-for` lower to execution
    /// edges in the DAG. `parent-child` is hierarchy only. `related` and
    /// `tracks` are ignored for execution-edge purposes.
    pub fn is_execution_edge(&self) -> bool {
        matches!(
            self,
            DepKind::Blocks | DepKind::ConditionalBlocks | DepKind::WaitsFor
        )
    }
}

/// One dependency edge as read from the bead store: `depends_on` is blocked
/// by nothing here — by convention `depends_on.id blocks issue_id` per
/// `DepKind::Blocks` direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dep {
    pub issue_id: String,
    pub depends_on: String,
    pub kind: DepKind,
}

// ---------------------------------------------------------------------------
// Bead
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub bead_type: BeadType,
    pub status: BeadStatus,
    pub title: String,
    pub description: Option<String>,
    pub labels: HashSet<String>,
    /// 0-4, 2 is default.
    pub priority: i32,
    pub parent: Option<String>,
    pub children: HashSet<String>,
    pub blocked_by: HashSet<String>,
    pub blocks: HashSet<String>,
    pub assignee: Option<String>,
    /// Target worker pool, read from the bead's attachment fields by the
    /// planner and scheduler. `None` for beads with no assigned rig yet.
    pub rig: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bead {
    pub fn new(id: impl Into<String>, title: impl Into<String>, bead_type: BeadType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            bead_type,
            status: BeadStatus::Open,
            title: title.into(),
            description: None,
            labels: HashSet::new(),
            priority: 2,
            parent: None,
            children: HashSet::new(),
            blocked_by: HashSet::new(),
            blocks: HashSet::new(),
            assignee: None,
            rig: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_slingable(&self) -> bool {
        self.bead_type.is_slingable()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Parse a `done-intent:<exit-type>:<unix-ts>` label if present.
    pub fn done_intent(&self) -> Option<(ExitType, i64)> {
        self.labels.iter().find_map(|l| {
            let rest = l.strip_prefix("done-intent:")?;
            let (exit, ts) = rest.split_once(':')?;
            Some((ExitType::parse(exit)?, ts.parse().ok()?))
        })
    }

    /// Parse all `done-cp:<stage>:<value>:<unix-ts>` labels into a map of
    /// stage name to (value, timestamp), keeping the latest per stage.
    pub fn checkpoints(&self) -> std::collections::HashMap<String, (String, i64)> {
        let mut out = std::collections::HashMap::new();
        for l in &self.labels {
            let Some(rest) = l.strip_prefix("done-cp:") else {
                continue;
            };
            let mut parts = rest.splitn(3, ':');
            let (Some(stage), Some(value), Some(ts)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Ok(ts) = ts.parse::<i64>() else { continue };
            out.entry(stage.to_string())
                .and_modify(|e: &mut (String, i64)| {
                    if ts > e.1 {
                        *e = (value.to_string(), ts);
                    }
                })
                .or_insert((value.to_string(), ts));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ExitType / MergeStrategy / RecoveryVerdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    Completed,
    Escalated,
    Deferred,
}

impl ExitType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" | "COMPLETED" => Some(ExitType::Completed),
            "escalated" | "ESCALATED" => Some(ExitType::Escalated),
            "deferred" | "DEFERRED" => Some(ExitType::Deferred),
            _ => None,
        }
    }

    pub fn as_label_str(&self) -> &'static str {
        match self {
            ExitType::Completed => "completed",
            ExitType::Escalated => "escalated",
            ExitType::Deferred => "deferred",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Local,
    Direct,
    Mr,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Mr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryVerdict {
    SafeToNuke,
    NeedsMqSubmit,
    NeedsRecovery,
}

// ---------------------------------------------------------------------------
// ContextBeadBlock — the scheduler's structured description payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBeadBlock {
    pub version: u32,
    pub work_bead: String,
    pub target_rig: String,
    pub enqueued_at: DateTime<Utc>,
    pub dispatch_failures: u32,
    pub last_failure: Option<String>,
    pub convoy: Option<String>,
    pub merge_strategy: Option<MergeStrategy>,
}

impl ContextBeadBlock {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(work_bead: impl Into<String>, target_rig: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            work_bead: work_bead.into(),
            target_rig: target_rig.into(),
            enqueued_at: Utc::now(),
            dispatch_failures: 0,
            last_failure: None,
            convoy: None,
            merge_strategy: None,
        }
    }

    /// Encode as the stable key:value block stored in the context bead's
    /// description. One `key: value` pair per line.
    pub fn encode(&self) -> String {
        let mut lines = vec![
            format!("version: {}", self.version),
            format!("work_bead: {}", self.work_bead),
            format!("target_rig: {}", self.target_rig),
            format!("enqueued_at: {}", self.enqueued_at.to_rfc3339()),
            format!("dispatch_failures: {}", self.dispatch_failures),
        ];
        if let Some(ref f) = self.last_failure {
            lines.push(format!("last_failure: {f}"));
        }
        if let Some(ref c) = self.convoy {
            lines.push(format!("convoy: {c}"));
        }
        if let Some(ref m) = self.merge_strategy {
            let s = match m {
                MergeStrategy::Local => "local",
                MergeStrategy::Direct => "direct",
                MergeStrategy::Mr => "mr",
            };
            lines.push(format!("merge_strategy: {s}"));
        }
        lines.join("\n")
    }

    /// Parse the key:value block. Returns `None` on any malformed or
    /// missing-required-field input (closed by the dispatch loop's
    /// stale-cleanup pass as `invalid-context`).
    pub fn parse(description: &str) -> Option<Self> {
        let mut version = None;
        let mut work_bead = None;
        let mut target_rig = None;
        let mut enqueued_at = None;
        let mut dispatch_failures = 0u32;
        let mut last_failure = None;
        let mut convoy = None;
        let mut merge_strategy = None;

        for line in description.lines() {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "version" => version = value.parse().ok(),
                "work_bead" => work_bead = Some(value.to_string()),
                "target_rig" => target_rig = Some(value.to_string()),
                "enqueued_at" => {
                    enqueued_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|d| d.with_timezone(&Utc))
                }
                "dispatch_failures" => dispatch_failures = value.parse().unwrap_or(0),
                "last_failure" => last_failure = Some(value.to_string()),
                "convoy" => convoy = Some(value.to_string()),
                "merge_strategy" => {
                    merge_strategy = match value {
                        "local" => Some(MergeStrategy::Local),
                        "direct" => Some(MergeStrategy::Direct),
                        "mr" => Some(MergeStrategy::Mr),
                        _ => None,
                    }
                }
                _ => {}
            }
        }

        Some(Self {
            version: version?,
            work_bead: work_bead?,
            target_rig: target_rig?,
            enqueued_at: enqueued_at?,
            dispatch_failures,
            last_failure,
            convoy,
            merge_strategy,
        })
    }
}

// ---------------------------------------------------------------------------
// AgentRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Town-level coordinator.
    Mayor,
    /// Town-level health-checker.
    Deacon,
    /// Per-rig health-monitor; runs the patrol loop.
    Witness,
    /// Per-rig merge-gate; the only agent that performs merges.
    Refinery,
    /// Ephemeral worker slot.
    Polecat,
    /// Permanent worker with a long-lived workspace.
    Crew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycleState {
    Working,
    Stuck,
    Idle,
    Nuked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Clean,
    Uncommitted,
    Stash,
    Unpushed,
    Unknown,
}

// ---------------------------------------------------------------------------
// AgentIdentity — the persistent per-agent record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// The agent-type bead id backing this identity.
    pub id: String,
    pub role: AgentRole,
    pub rig: String,
    pub name: String,
    /// The work bead currently hooked, if any.
    pub hook: Option<String>,
    pub state: AgentLifecycleState,
    pub cleanup_status: CleanupStatus,
    pub active_mr: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>, role: AgentRole, rig: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role,
            rig: rig.into(),
            name: name.into(),
            hook: None,
            state: AgentLifecycleState::Idle,
            cleanup_status: CleanupStatus::Unknown,
            active_mr: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Convoy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvoyStatus {
    Open,
    StagedReady,
    StagedWarnings,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convoy {
    pub id: String,
    pub title: String,
    pub status: ConvoyStatus,
    /// Slingable beads tracked by this convoy via `tracks` deps.
    pub tracked: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mail {
    pub id: uuid::Uuid,
    pub from_agent: String,
    pub to_agent: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Body fields of the `POLECAT_DONE` notification sent at the end of the
/// completion protocol (§4.5.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolecatDoneBody {
    pub exit_type: ExitType,
    pub bead_id: String,
    pub mr_id: Option<String>,
    pub branch: Option<String>,
    pub convoy: Option<String>,
    pub push_failed: bool,
    pub mr_failed: bool,
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Event (patrol loop)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Done,
    Merged,
    MergeFailed,
    SessionDeath,
    Kill,
    Nudge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor: String,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Stage planner output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingCategory {
    Cycle,
    NoRig,
    Orphan,
    BlockedRig,
    MissingBranch,
    CrossRig,
    Capacity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFinding {
    pub severity: FindingSeverity,
    pub category: FindingCategory,
    pub bead_ids: Vec<String>,
    pub message: String,
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wave {
    pub number: u32,
    pub bead_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// KpiSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub timestamp: DateTime<Utc>,
    pub queued_total: usize,
    pub queued_ready: usize,
    pub slots_working: usize,
    pub slots_idle: usize,
    pub slots_stuck: usize,
    pub slots_nuked_today: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_prefix_splits_on_first_dash() {
        assert_eq!(routing_prefix("gt-001"), "gt");
        assert_eq!(routing_prefix("bd-foo-bar"), "bd");
        assert_eq!(routing_prefix("noprefix"), "noprefix");
    }

    #[test]
    fn bead_ref_roundtrips_external() {
        let r = BeadRef::parse("external:gt:gt-001");
        assert_eq!(
            r,
            BeadRef::External {
                prefix: "gt".into(),
                id: "gt-001".into()
            }
        );
        assert_eq!(r.encode(), "external:gt:gt-001");
    }

    #[test]
    fn bead_ref_local_passthrough() {
        let r = BeadRef::parse("gt-001");
        assert_eq!(r, BeadRef::Local("gt-001".into()));
    }

    #[test]
    fn dep_kind_execution_edges() {
        assert!(DepKind::Blocks.is_execution_edge());
        assert!(DepKind::ConditionalBlocks.is_execution_edge());
        assert!(DepKind::WaitsFor.is_execution_edge());
        assert!(!DepKind::ParentChild.is_execution_edge());
        assert!(!DepKind::Related.is_execution_edge());
        assert!(!DepKind::Tracks.is_execution_edge());
    }

    #[test]
    fn bead_type_slingable() {
        assert!(BeadType::Task.is_slingable());
        assert!(BeadType::Bug.is_slingable());
        assert!(!BeadType::Epic.is_slingable());
        assert!(!BeadType::Convoy.is_slingable());
        assert!(!BeadType::MergeRequest.is_slingable());
    }

    #[test]
    fn context_bead_block_roundtrips() {
        let mut block = ContextBeadBlock::new("gt-001", "rigA");
        block.convoy = Some("gt-900".into());
        block.merge_strategy = Some(MergeStrategy::Mr);
        let encoded = block.encode();
        let decoded = ContextBeadBlock::parse(&encoded).unwrap();
        assert_eq!(decoded.work_bead, "gt-001");
        assert_eq!(decoded.target_rig, "rigA");
        assert_eq!(decoded.convoy.as_deref(), Some("gt-900"));
        assert_eq!(decoded.merge_strategy, Some(MergeStrategy::Mr));
    }

    #[test]
    fn context_bead_block_rejects_missing_fields() {
        assert!(ContextBeadBlock::parse("version: 1\nwork_bead: gt-001").is_none());
    }

    #[test]
    fn done_intent_label_parses() {
        let mut bead = Bead::new("gt-001", "t", BeadType::Task);
        bead.labels.insert("done-intent:completed:1700000000".into());
        let (exit, ts) = bead.done_intent().unwrap();
        assert_eq!(exit, ExitType::Completed);
        assert_eq!(ts, 1700000000);
    }

    #[test]
    fn checkpoints_keep_latest_per_stage() {
        let mut bead = Bead::new("gt-001", "t", BeadType::Task);
        bead.labels.insert("done-cp:pushed:ok:100".into());
        bead.labels.insert("done-cp:pushed:ok:200".into());
        let cps = bead.checkpoints();
        assert_eq!(cps.get("pushed"), Some(&("ok".to_string(), 200)));
    }
}
