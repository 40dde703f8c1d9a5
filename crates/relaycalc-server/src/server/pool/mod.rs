//! Fixed-size worker pool for the compute node.
//!
//! Computations run on dedicated OS threads, never on the async runtime, so
//! a long evaluation cannot hold up the accept loop or other connections.
//!
//! - [`manager`] - [`WorkerPool`](manager::WorkerPool): submission and
//!   shutdown.
//! - [`worker`] - The per-thread receive/evaluate loop.
//! - [`request`] - Messages exchanged between the pool and its workers.

pub mod manager;
pub mod request;
pub mod worker;
