//! PTY pooling for the worker lifecycle controller's spawn step (§4.4.1):
//! bounded concurrent pseudo-terminal allocation for ephemeral workers.

pub mod pty_pool;
