//! Reliability and operational infrastructure shared across the town's
//! long-running processes: a circuit breaker (generalized for the capacity
//! scheduler's per-context-bead dispatch-failure tripping and bead-store
//! retry), rate limiting for outbound calls, and cooperative shutdown
//! coordination.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod shutdown;
