use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use tokio_rusqlite::Connection;

use crate::types::{
    AgentIdentity, AgentLifecycleState, AgentRole, Bead, BeadStatus, BeadType, CleanupStatus,
    Convoy, ConvoyStatus, Dep, DepKind, KpiSnapshot,
};

/// Async SQLite-backed cache for beads, agent identities, deps, routes, and
/// convoys. This is the town's local mirror of the bead store — the bead
/// store adapter (`crate::bead_store`) is the typed contract callers use;
/// `CacheDb` is its persistence layer.
pub struct CacheDb {
    conn: Connection,
}

// ---------------------------------------------------------------------------
// helpers -- enum <-> SQLite string, set <-> JSON array
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

fn set_to_sql(set: &HashSet<String>) -> String {
    let mut v: Vec<&String> = set.iter().collect();
    v.sort();
    serde_json::to_string(&v).expect("serialize set")
}

fn set_from_sql(raw: &str) -> HashSet<String> {
    serde_json::from_str::<Vec<String>>(raw)
        .unwrap_or_default()
        .into_iter()
        .collect()
}

impl CacheDb {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-64000;
                    PRAGMA mmap_size=268435456;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS beads (
                        id          TEXT PRIMARY KEY,
                        bead_type   TEXT NOT NULL,
                        status      TEXT NOT NULL,
                        title       TEXT NOT NULL,
                        description TEXT,
                        labels      TEXT NOT NULL DEFAULT '[]',
                        priority    INTEGER NOT NULL DEFAULT 2,
                        parent      TEXT,
                        children    TEXT NOT NULL DEFAULT '[]',
                        blocked_by  TEXT NOT NULL DEFAULT '[]',
                        blocks      TEXT NOT NULL DEFAULT '[]',
                        assignee    TEXT,
                        rig         TEXT,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_beads_status ON beads(status);
                    CREATE INDEX IF NOT EXISTS idx_beads_type   ON beads(bead_type);
                    CREATE INDEX IF NOT EXISTS idx_beads_rig    ON beads(rig);

                    CREATE TABLE IF NOT EXISTS deps (
                        issue_id    TEXT NOT NULL,
                        depends_on  TEXT NOT NULL,
                        kind        TEXT NOT NULL,
                        PRIMARY KEY (issue_id, depends_on, kind)
                    );

                    CREATE INDEX IF NOT EXISTS idx_deps_issue ON deps(issue_id);
                    CREATE INDEX IF NOT EXISTS idx_deps_depends_on ON deps(depends_on);

                    CREATE TABLE IF NOT EXISTS agent_identities (
                        id              TEXT PRIMARY KEY,
                        role            TEXT NOT NULL,
                        rig             TEXT NOT NULL,
                        name            TEXT NOT NULL,
                        hook            TEXT,
                        state           TEXT NOT NULL,
                        cleanup_status  TEXT NOT NULL,
                        active_mr       TEXT,
                        created_at      TEXT NOT NULL,
                        updated_at      TEXT NOT NULL,
                        UNIQUE(rig, name)
                    );

                    CREATE INDEX IF NOT EXISTS idx_identities_rig   ON agent_identities(rig);
                    CREATE INDEX IF NOT EXISTS idx_identities_state ON agent_identities(state);

                    CREATE TABLE IF NOT EXISTS convoys (
                        id          TEXT PRIMARY KEY,
                        title       TEXT NOT NULL,
                        status      TEXT NOT NULL,
                        tracked     TEXT NOT NULL DEFAULT '[]',
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS routes (
                        prefix TEXT PRIMARY KEY,
                        path   TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Bead CRUD
    // -----------------------------------------------------------------------

    pub async fn upsert_bead(&self, bead: &Bead) -> Result<(), tokio_rusqlite::Error> {
        let id = bead.id.clone();
        let bead_type = enum_to_sql(&bead.bead_type);
        let status = enum_to_sql(&bead.status);
        let title = bead.title.clone();
        let description = bead.description.clone();
        let labels = set_to_sql(&bead.labels);
        let priority = bead.priority;
        let parent = bead.parent.clone();
        let children = set_to_sql(&bead.children);
        let blocked_by = set_to_sql(&bead.blocked_by);
        let blocks = set_to_sql(&bead.blocks);
        let assignee = bead.assignee.clone();
        let rig = bead.rig.clone();
        let created_at = bead.created_at.to_rfc3339();
        let updated_at = bead.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO beads (id, bead_type, status, title, description, labels,
                        priority, parent, children, blocked_by, blocks, assignee, rig,
                        created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
                     ON CONFLICT(id) DO UPDATE SET
                        bead_type=excluded.bead_type, status=excluded.status,
                        title=excluded.title, description=excluded.description,
                        labels=excluded.labels, priority=excluded.priority,
                        parent=excluded.parent, children=excluded.children,
                        blocked_by=excluded.blocked_by, blocks=excluded.blocks,
                        assignee=excluded.assignee, rig=excluded.rig,
                        updated_at=excluded.updated_at",
                    rusqlite::params![
                        id, bead_type, status, title, description, labels, priority, parent,
                        children, blocked_by, blocks, assignee, rig, created_at, updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_bead(&self, id: &str) -> Result<Option<Bead>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", BEAD_SELECT))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_bead(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn list_beads_by_status(
        &self,
        status: BeadStatus,
    ) -> Result<Vec<Bead>, tokio_rusqlite::Error> {
        let status_str = enum_to_sql(&status);
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("{} WHERE status = ?1 ORDER BY created_at ASC", BEAD_SELECT))?;
                let mut rows = stmt.query(rusqlite::params![status_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_bead(row)?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn list_beads_by_type(
        &self,
        bead_type: BeadType,
    ) -> Result<Vec<Bead>, tokio_rusqlite::Error> {
        let type_str = enum_to_sql(&bead_type);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE bead_type = ?1 ORDER BY created_at ASC",
                    BEAD_SELECT
                ))?;
                let mut rows = stmt.query(rusqlite::params![type_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_bead(row)?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn delete_bead(&self, id: &str) -> Result<(), tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM beads WHERE id = ?1", rusqlite::params![id])?;
                Ok(())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Deps
    // -----------------------------------------------------------------------

    pub async fn add_dep(&self, dep: &Dep) -> Result<(), tokio_rusqlite::Error> {
        let issue_id = dep.issue_id.clone();
        let depends_on = dep.depends_on.clone();
        let kind = enum_to_sql(&dep.kind);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO deps (issue_id, depends_on, kind) VALUES (?1,?2,?3)",
                    rusqlite::params![issue_id, depends_on, kind],
                )?;
                Ok(())
            })
            .await
    }

    /// All deps touching any bead in the given set (either side), used by
    /// the stage planner's bead-closure walk.
    pub async fn deps_touching(&self, ids: Vec<String>) -> Result<Vec<Dep>, tokio_rusqlite::Error> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT issue_id, depends_on, kind FROM deps")?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                let id_set: HashSet<&String> = ids.iter().collect();
                while let Some(row) = rows.next()? {
                    let issue_id: String = row.get(0)?;
                    let depends_on: String = row.get(1)?;
                    if id_set.contains(&issue_id) || id_set.contains(&depends_on) {
                        let kind_str: String = row.get(2)?;
                        out.push(Dep {
                            issue_id,
                            depends_on,
                            kind: enum_from_sql(&kind_str),
                        });
                    }
                }
                Ok(out)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Agent identity CRUD
    // -----------------------------------------------------------------------

    pub async fn upsert_identity(&self, identity: &AgentIdentity) -> Result<(), tokio_rusqlite::Error> {
        let id = identity.id.clone();
        let role = enum_to_sql(&identity.role);
        let rig = identity.rig.clone();
        let name = identity.name.clone();
        let hook = identity.hook.clone();
        let state = enum_to_sql(&identity.state);
        let cleanup_status = enum_to_sql(&identity.cleanup_status);
        let active_mr = identity.active_mr.clone();
        let created_at = identity.created_at.to_rfc3339();
        let updated_at = identity.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO agent_identities (id, role, rig, name, hook, state,
                        cleanup_status, active_mr, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                     ON CONFLICT(id) DO UPDATE SET
                        role=excluded.role, rig=excluded.rig, name=excluded.name,
                        hook=excluded.hook, state=excluded.state,
                        cleanup_status=excluded.cleanup_status, active_mr=excluded.active_mr,
                        updated_at=excluded.updated_at",
                    rusqlite::params![
                        id, role, rig, name, hook, state, cleanup_status, active_mr, created_at,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_identity_by_name(
        &self,
        rig: &str,
        name: &str,
    ) -> Result<Option<AgentIdentity>, tokio_rusqlite::Error> {
        let rig = rig.to_string();
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE rig = ?1 AND name = ?2",
                    IDENTITY_SELECT
                ))?;
                let mut rows = stmt.query(rusqlite::params![rig, name])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_identity(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn list_identities_by_rig(
        &self,
        rig: &str,
    ) -> Result<Vec<AgentIdentity>, tokio_rusqlite::Error> {
        let rig = rig.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE rig = ?1", IDENTITY_SELECT))?;
                let mut rows = stmt.query(rusqlite::params![rig])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_identity(row)?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn list_identities_by_state(
        &self,
        state: AgentLifecycleState,
    ) -> Result<Vec<AgentIdentity>, tokio_rusqlite::Error> {
        let state_str = enum_to_sql(&state);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE state = ?1", IDENTITY_SELECT))?;
                let mut rows = stmt.query(rusqlite::params![state_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_identity(row)?);
                }
                Ok(out)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Convoy CRUD
    // -----------------------------------------------------------------------

    pub async fn upsert_convoy(&self, convoy: &Convoy) -> Result<(), tokio_rusqlite::Error> {
        let id = convoy.id.clone();
        let title = convoy.title.clone();
        let status = enum_to_sql(&convoy.status);
        let tracked = set_to_sql(&convoy.tracked);
        let created_at = convoy.created_at.to_rfc3339();
        let updated_at = convoy.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO convoys (id, title, status, tracked, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6)
                     ON CONFLICT(id) DO UPDATE SET
                        title=excluded.title, status=excluded.status, tracked=excluded.tracked,
                        updated_at=excluded.updated_at",
                    rusqlite::params![id, title, status, tracked, created_at, updated_at],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_convoy(&self, id: &str) -> Result<Option<Convoy>, tokio_rusqlite::Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, status, tracked, created_at, updated_at
                     FROM convoys WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_convoy(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Routes
    // -----------------------------------------------------------------------

    pub async fn set_route(&self, prefix: &str, path: &str) -> Result<(), tokio_rusqlite::Error> {
        let prefix = prefix.to_string();
        let path = path.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO routes (prefix, path) VALUES (?1,?2)
                     ON CONFLICT(prefix) DO UPDATE SET path=excluded.path",
                    rusqlite::params![prefix, path],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn list_routes(&self) -> Result<Vec<(String, String)>, tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT prefix, path FROM routes ORDER BY prefix")?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push((row.get(0)?, row.get(1)?));
                }
                Ok(out)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // KPI
    // -----------------------------------------------------------------------

    pub async fn compute_kpi_snapshot(&self) -> Result<KpiSnapshot, tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                let count_status = |status: &str| -> rusqlite::Result<usize> {
                    conn.prepare("SELECT COUNT(*) FROM beads WHERE status = ?1")?
                        .query_row(rusqlite::params![status], |r| r.get(0))
                };
                let count_state = |state: &str| -> rusqlite::Result<usize> {
                    conn.prepare("SELECT COUNT(*) FROM agent_identities WHERE state = ?1")?
                        .query_row(rusqlite::params![state], |r| r.get(0))
                };

                Ok(KpiSnapshot {
                    timestamp: Utc::now(),
                    queued_total: count_status("open")?,
                    queued_ready: 0, // computed by the scheduler against the live DAG
                    slots_working: count_state("working")?,
                    slots_idle: count_state("idle")?,
                    slots_stuck: count_state("stuck")?,
                    slots_nuked_today: count_state("nuked")?,
                })
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

const BEAD_SELECT: &str = "SELECT id, bead_type, status, title, description, labels, priority, \
    parent, children, blocked_by, blocks, assignee, rig, created_at, updated_at FROM beads";

const IDENTITY_SELECT: &str = "SELECT id, role, rig, name, hook, state, cleanup_status, \
    active_mr, created_at, updated_at FROM agent_identities";

fn row_to_bead(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bead> {
    let bead_type_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let labels_str: String = row.get(5)?;
    let children_str: String = row.get(8)?;
    let blocked_by_str: String = row.get(9)?;
    let blocks_str: String = row.get(10)?;
    let created_at_str: String = row.get(13)?;
    let updated_at_str: String = row.get(14)?;

    Ok(Bead {
        id: row.get(0)?,
        bead_type: enum_from_sql(&bead_type_str),
        status: enum_from_sql(&status_str),
        title: row.get(3)?,
        description: row.get(4)?,
        labels: set_from_sql(&labels_str),
        priority: row.get(6)?,
        parent: row.get(7)?,
        children: set_from_sql(&children_str),
        blocked_by: set_from_sql(&blocked_by_str),
        blocks: set_from_sql(&blocks_str),
        assignee: row.get(11)?,
        rig: row.get(12)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .expect("valid date")
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .expect("valid date")
            .with_timezone(&Utc),
    })
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentIdentity> {
    let role_str: String = row.get(1)?;
    let state_str: String = row.get(5)?;
    let cleanup_status_str: String = row.get(6)?;
    let created_at_str: String = row.get(8)?;
    let updated_at_str: String = row.get(9)?;

    Ok(AgentIdentity {
        id: row.get(0)?,
        role: enum_from_sql(&role_str),
        rig: row.get(2)?,
        name: row.get(3)?,
        hook: row.get(4)?,
        state: enum_from_sql(&state_str),
        cleanup_status: enum_from_sql(&cleanup_status_str),
        active_mr: row.get(7)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .expect("valid date")
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .expect("valid date")
            .with_timezone(&Utc),
    })
}

fn row_to_convoy(row: &rusqlite::Row<'_>) -> rusqlite::Result<Convoy> {
    let status_str: String = row.get(2)?;
    let tracked_str: String = row.get(3)?;
    let created_at_str: String = row.get(4)?;
    let updated_at_str: String = row.get(5)?;

    Ok(Convoy {
        id: row.get(0)?,
        title: row.get(1)?,
        status: enum_from_sql(&status_str),
        tracked: set_from_sql(&tracked_str),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .expect("valid date")
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .expect("valid date")
            .with_timezone(&Utc),
    })
}
