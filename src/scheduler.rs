//! Tile grid construction, the claim/finalize protocol, and the worker pool.

mod hilbert;
/// The tile repository and its scheduling queues.
pub mod repository;
/// The worker-pool render session.
pub mod session;
/// Per-tile state and claim tickets.
pub mod tile;
