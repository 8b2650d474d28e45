//! Crashed-worker detection: identity beads stuck in `working` with no
//! recent activity, the signature of a session that died without running
//! the completion protocol. Used by the patrol loop's full-discovery sweep
//! (§4.6) alongside the staleness check in `at_agents::worker_lifecycle`.

use std::time::Duration;

use anyhow::Result;
use at_core::cache::CacheDb;
use at_core::types::{AgentIdentity, AgentLifecycleState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An identity bead that has been `working` for longer than the staleness
/// threshold with no observed update — almost certainly a crashed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleAgent {
    pub id: String,
    pub name: String,
    pub rig: String,
    pub last_seen: DateTime<Utc>,
    #[serde(with = "duration_serde")]
    pub duration_since: Duration,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationRepr {
        secs: u64,
        nanos: u32,
    }

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        DurationRepr {
            secs: dur.as_secs(),
            nanos: dur.subsec_nanos(),
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let repr = DurationRepr::deserialize(d)?;
        Ok(Duration::new(repr.secs, repr.nanos))
    }
}

/// Scans identity beads for crashed workers across an entire rig.
pub struct HeartbeatMonitor {
    staleness_threshold: Duration,
}

impl HeartbeatMonitor {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            staleness_threshold,
        }
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// Check every identity bead for the given rig and return those in
    /// `working` state whose `updated_at` is older than the threshold.
    pub async fn check_rig(&self, cache: &CacheDb, rig: &str) -> Result<Vec<StaleAgent>> {
        let identities = cache
            .list_identities_by_rig(rig)
            .await
            .map_err(|e| anyhow::anyhow!("failed to list identities for rig {rig}: {e}"))?;
        Ok(self.stale_among(&identities, Utc::now()))
    }

    fn stale_among(&self, identities: &[AgentIdentity], now: DateTime<Utc>) -> Vec<StaleAgent> {
        identities
            .iter()
            .filter(|id| id.state == AgentLifecycleState::Working)
            .filter_map(|id| {
                let elapsed = (now - id.updated_at).to_std().ok()?;
                if elapsed > self.staleness_threshold {
                    Some(StaleAgent {
                        id: id.id.clone(),
                        name: id.name.clone(),
                        rig: id.rig.clone(),
                        last_seen: id.updated_at,
                        duration_since: elapsed,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}
