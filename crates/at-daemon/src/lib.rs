//! The town's long-running background process: the capacity scheduler
//! (§4.3) and the event-driven patrol loop (§4.6), wired together on a
//! per-rig or per-town basis.

pub mod daemon;
pub mod heartbeat;
pub mod kpi;
pub mod patrol;
pub mod scheduler;
