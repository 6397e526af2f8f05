//! Frontier: the per-job queue of URLs awaiting fetch
//!
//! Holds the ready heap, the delayed heap for retries, items parked until their
//! host may take another request, the in-flight table, the visited set and the
//! per-host politeness state. All of it sits behind a single mutex; waiters
//! are woken through a `Notify`.

mod item;
mod queue;

pub use item::{Candidate, FrontierCheckpoint, FrontierItem, PendingItem};
pub use queue::{Admission, Dequeued, Frontier, FrontierLimits, FrontierStats, Requeued};
