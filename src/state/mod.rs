//! Job lifecycle status and per-host politeness state
//!
//! - `JobStatus`: the job state machine's states and legal transitions
//! - `HostThrottle`: spacing between fetches to one host, per-host concurrency
//!   and 429 cool-down; owned by the frontier

mod host_state;
mod job_status;

pub use host_state::{HostReadiness, HostState, HostThrottle, MAX_HOST_WAIT};
pub use job_status::JobStatus;
