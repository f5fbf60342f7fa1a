//! Queue primitives used by the connection engine (§4.2, §4.3).

pub mod cyclic;
pub mod locking;

pub use cyclic::CyclicQueue;
pub use locking::{LockingQueue, QueueCore};
