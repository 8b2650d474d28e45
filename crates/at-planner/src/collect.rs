//! Bead collection (§4.2.2) — resolves a `StageInput` into the full set of
//! beads and dep edges the DAG builder needs.

use std::collections::{HashMap, HashSet};

use at_core::bead_store::BeadStoreAdapter;
use at_core::types::{Bead, BeadType, Dep, DepKind};
use thiserror::Error;

use crate::input::StageInput;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("bead not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] at_core::bead_store::BeadStoreError),
}

/// Everything the DAG builder needs: the full bead closure plus every dep
/// edge touching it.
#[derive(Debug, Clone, Default)]
pub struct BeadClosure {
    pub beads: HashMap<String, Bead>,
    pub deps: Vec<Dep>,
}

/// Walk the parent→children hierarchy in full (any depth) starting from an
/// epic, collecting every descendant plus every dep edge encountered.
pub async fn collect_epic(store: &BeadStoreAdapter, epic_id: &str) -> Result<BeadClosure, CollectError> {
    let mut beads = HashMap::new();
    let mut frontier = vec![epic_id.to_string()];
    while let Some(id) = frontier.pop() {
        if beads.contains_key(&id) {
            continue;
        }
        let bead = store
            .show(&id)
            .await
            .map_err(|_| CollectError::NotFound(id.clone()))?;
        for child in &bead.children {
            if !beads.contains_key(child) {
                frontier.push(child.clone());
            }
        }
        beads.insert(id, bead);
    }
    let ids: Vec<String> = beads.keys().cloned().collect();
    let deps = store.deps_touching(&ids).await?;
    Ok(BeadClosure { beads, deps })
}

/// Follow only `tracks` dependencies one hop from a convoy and return the
/// tracked beads — the convoy itself is not included in the closure.
pub async fn collect_convoy(store: &BeadStoreAdapter, convoy_id: &str) -> Result<BeadClosure, CollectError> {
    let convoy_ids = vec![convoy_id.to_string()];
    let all_deps = store.deps_touching(&convoy_ids).await?;
    let tracked: HashSet<String> = all_deps
        .iter()
        .filter(|d| d.kind == DepKind::Tracks && d.issue_id == convoy_id)
        .map(|d| d.depends_on.clone())
        .collect();

    let mut beads = HashMap::new();
    for id in &tracked {
        let bead = store
            .show(id)
            .await
            .map_err(|_| CollectError::NotFound(id.clone()))?;
        beads.insert(id.clone(), bead);
    }
    let ids: Vec<String> = beads.keys().cloned().collect();
    let deps = store.deps_touching(&ids).await?;
    Ok(BeadClosure { beads, deps })
}

/// Load exactly the listed beads plus any dep edges between them.
pub async fn collect_tasks(store: &BeadStoreAdapter, ids: &[String]) -> Result<BeadClosure, CollectError> {
    let mut beads = HashMap::new();
    for id in ids {
        let bead = store
            .show(id)
            .await
            .map_err(|_| CollectError::NotFound(id.clone()))?;
        beads.insert(id.clone(), bead);
    }
    let deps = store.deps_touching(&ids.to_vec()).await?;
    Ok(BeadClosure { beads, deps })
}

pub async fn collect(store: &BeadStoreAdapter, input: &StageInput) -> Result<BeadClosure, CollectError> {
    match input {
        StageInput::Epic(id) => collect_epic(store, id).await,
        StageInput::Convoy(id) => collect_convoy(store, id).await,
        StageInput::Tasks(ids) => collect_tasks(store, ids).await,
    }
}

/// True if any bead in the closure is of the given type.
pub fn contains_type(closure: &BeadClosure, bead_type: BeadType) -> bool {
    closure.beads.values().any(|b| b.bead_type == bead_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_core::cache::CacheDb;
    use at_core::types::{Bead, BeadType};
    use std::sync::Arc;

    async fn store_with(beads: Vec<Bead>, deps: Vec<Dep>) -> BeadStoreAdapter {
        let cache = Arc::new(CacheDb::new_in_memory().await.unwrap());
        for b in beads {
            cache.upsert_bead(&b).await.unwrap();
        }
        for d in deps {
            cache.add_dep(&d).await.unwrap();
        }
        BeadStoreAdapter::new(cache)
    }

    #[tokio::test]
    async fn epic_collects_full_descendant_tree() {
        let mut epic = Bead::new("gt-epic", "Epic", BeadType::Epic);
        epic.children.insert("gt-t1".to_string());
        let mut t1 = Bead::new("gt-t1", "T1", BeadType::Task);
        t1.parent = Some("gt-epic".to_string());
        t1.children.insert("gt-t2".to_string());
        let mut t2 = Bead::new("gt-t2", "T2", BeadType::Task);
        t2.parent = Some("gt-t1".to_string());

        let store = store_with(vec![epic, t1, t2], vec![]).await;
        let closure = collect_epic(&store, "gt-epic").await.unwrap();
        assert_eq!(closure.beads.len(), 3);
        assert!(closure.beads.contains_key("gt-t2"));
    }

    #[tokio::test]
    async fn missing_bead_fails_entire_collection() {
        let mut epic = Bead::new("gt-epic", "Epic", BeadType::Epic);
        epic.children.insert("gt-ghost".to_string());
        let store = store_with(vec![epic], vec![]).await;
        let err = collect_epic(&store, "gt-epic").await.unwrap_err();
        assert!(matches!(err, CollectError::NotFound(id) if id == "gt-ghost"));
    }

    #[tokio::test]
    async fn convoy_follows_tracks_one_hop_and_excludes_itself() {
        let convoy = Bead::new("gt-convoy", "Work", BeadType::Convoy);
        let t1 = Bead::new("gt-t1", "T1", BeadType::Task);
        let dep = Dep {
            issue_id: "gt-convoy".to_string(),
            depends_on: "gt-t1".to_string(),
            kind: DepKind::Tracks,
        };
        let store = store_with(vec![convoy, t1], vec![dep]).await;
        let closure = collect_convoy(&store, "gt-convoy").await.unwrap();
        assert_eq!(closure.beads.len(), 1);
        assert!(closure.beads.contains_key("gt-t1"));
        assert!(!closure.beads.contains_key("gt-convoy"));
    }
}
