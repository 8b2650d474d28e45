//! The worker lifecycle controller (spawn, nuke, staleness detection) and
//! the completion protocol that ephemeral workers run when they finish a
//! bead.

pub mod completion;
pub mod worker_lifecycle;
