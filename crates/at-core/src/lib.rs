//! Core library for auto-tundra — provides foundational types, the bead
//! store, the cache database, repository/worktree primitives, and config.

pub mod bead_store;
pub mod cache;
pub mod config;
pub mod event_log;
pub mod lockfile;
pub mod repo;
pub mod types;
pub mod worktree;

#[cfg(feature = "libgit2")]
pub mod git2_ops;
