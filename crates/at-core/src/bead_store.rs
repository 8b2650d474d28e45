//! Bead store adapter (§4.1) — the typed contract every other component
//! uses to read and mutate beads, instead of composing raw queries against
//! `CacheDb` directly.
//!
//! A single town may span several physical stores (one per rig plus a
//! town-level store); the `routes` table maps a bead id's routing prefix to
//! the store that owns it. This adapter is deliberately thin: for now every
//! prefix resolves to the same `CacheDb` handle (a single local SQLite
//! mirror), but callers already go through `BeadRef`/`routing_prefix` so a
//! future multi-store backend is a matter of swapping what `resolve`
//! returns, not touching call sites.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheDb;
use crate::types::{routing_prefix, Bead, BeadStatus, Dep};

#[derive(Debug, Error)]
pub enum BeadStoreError {
    #[error("bead not found: {0}")]
    NotFound(String),
    #[error("cache error: {0}")]
    Cache(#[from] tokio_rusqlite::Error),
    #[error("cross-store edge requires external-ref encoding: {0} -> {1}")]
    CrossStore(String, String),
}

pub type Result<T> = std::result::Result<T, BeadStoreError>;

/// A filter for `list`. `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<BeadStatus>,
    pub bead_type: Option<crate::types::BeadType>,
}

pub struct BeadStoreAdapter {
    cache: Arc<CacheDb>,
    retry_backoff_secs: u64,
}

impl BeadStoreAdapter {
    pub fn new(cache: Arc<CacheDb>) -> Self {
        Self {
            cache,
            retry_backoff_secs: 2,
        }
    }

    pub fn with_retry_backoff_secs(mut self, secs: u64) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    /// Routed by the bead id's prefix; currently every prefix resolves to
    /// the same local cache, but callers go through `routing_prefix` so a
    /// multi-store backend only needs to change here.
    fn resolve(&self, id: &str) -> &CacheDb {
        let _prefix = routing_prefix(id);
        &self.cache
    }

    pub async fn show(&self, id: &str) -> Result<Bead> {
        self.resolve(id)
            .get_bead(id)
            .await?
            .ok_or_else(|| BeadStoreError::NotFound(id.to_string()))
    }

    pub async fn show_multiple(&self, ids: &[String]) -> Result<Vec<Bead>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.show(id).await?);
        }
        Ok(out)
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Bead>> {
        let beads = match (&filter.status, &filter.bead_type) {
            (Some(status), _) => self.cache.list_beads_by_status(*status).await?,
            (None, Some(bead_type)) => self.cache.list_beads_by_type(*bead_type).await?,
            (None, None) => {
                let mut all = Vec::new();
                for status in [
                    BeadStatus::Open,
                    BeadStatus::InProgress,
                    BeadStatus::Hooked,
                    BeadStatus::StagedReady,
                    BeadStatus::StagedWarnings,
                    BeadStatus::Closed,
                ] {
                    all.extend(self.cache.list_beads_by_status(status).await?);
                }
                all
            }
        };
        Ok(beads
            .into_iter()
            .filter(|b| match filter.bead_type {
                Some(t) => b.bead_type == t,
                None => true,
            })
            .collect())
    }

    pub async fn create(&self, bead: Bead) -> Result<Bead> {
        self.resolve(&bead.id).upsert_bead(&bead).await?;
        Ok(bead)
    }

    pub async fn update(&self, id: &str, patch: impl FnOnce(&mut Bead)) -> Result<Bead> {
        let mut bead = self.show(id).await?;
        patch(&mut bead);
        bead.updated_at = chrono::Utc::now();
        self.resolve(id).upsert_bead(&bead).await?;
        Ok(bead)
    }

    /// Close a bead. With `force`, retries up to 3x with `attempt *
    /// retry_backoff_secs` second backoff on transient lock contention.
    pub async fn close(&self, id: &str, force: bool, reason: Option<&str>) -> Result<Bead> {
        if !force {
            return self.close_once(id, reason).await;
        }
        let mut last_err = None;
        for attempt in 1..=3u32 {
            match self.close_once(id, reason).await {
                Ok(bead) => return Ok(bead),
                Err(e) => {
                    tracing::warn!(id = %id, attempt, error = %e, "close --force retrying");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs(
                        attempt as u64 * self.retry_backoff_secs,
                    ))
                    .await;
                }
            }
        }
        Err(last_err.expect("loop ran at least once"))
    }

    async fn close_once(&self, id: &str, reason: Option<&str>) -> Result<Bead> {
        self.update(id, |b| {
            b.status = BeadStatus::Closed;
            if let Some(r) = reason {
                b.labels.insert(format!("closed-reason:{r}"));
            }
        })
        .await
    }

    pub async fn dep_add(&self, dep: Dep) -> Result<()> {
        let issue_prefix = routing_prefix(&dep.issue_id);
        let dep_prefix = routing_prefix(&dep.depends_on);
        if issue_prefix != dep_prefix {
            tracing::debug!(
                issue = %dep.issue_id, depends_on = %dep.depends_on,
                "cross-store dep edge; caller should prefer external-ref encoding"
            );
        }
        self.cache.add_dep(&dep).await?;
        Ok(())
    }

    pub async fn list_routes(&self) -> Result<Vec<(String, String)>> {
        Ok(self.cache.list_routes().await?)
    }

    /// All dep edges touching any bead in the given set, either side. The
    /// stage planner's bead-closure walk uses this to pull in edges between
    /// beads it has already collected without re-querying per pair.
    pub async fn deps_touching(&self, ids: &[String]) -> Result<Vec<Dep>> {
        Ok(self.cache.deps_touching(ids.to_vec()).await?)
    }
}
