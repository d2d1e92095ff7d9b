//! Concurrent sorted list based on lock coupling (hand-over-hand locking) for Rust
//!
//! A single global lock serializes every operation on a shared list. Lock coupling keeps one
//! lock per node instead: a traversal locks the sentinel head, then its successor, and from then
//! on releases the trailing lock only after the leading one is held, so it owns exactly two
//! adjacent nodes at a time. Operations on different parts of the chain proceed in parallel, and
//! because every thread acquires locks in the same forward direction no cycle of waiters can
//! form.
//!
//! `LockCouplingList` keeps integer keys in non-decreasing order and supports `insert`,
//! `remove` and `lookup` from any number of threads. Nodes are stored in a `NodeArena` and linked
//! by index. The `workload` module drives a list with many randomized actors and a bounded join,
//! which is how deadlocks are detected.
//!

mod node_arena;
pub mod util;
pub mod error;
pub mod spin_lock;
pub mod lock_coupling_list;
pub mod workload;

pub use node_arena::{Key, MAX_NODE_COUNT, SEGMENT_COUNT};

#[macro_use]
extern crate log;

#[macro_use]
extern crate cfg_if;

extern crate core_affinity;
extern crate rand;
