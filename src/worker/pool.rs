use crate::worker::{run_worker, WorkerContext};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Spawns `count` workers sharing one context
pub(crate) fn spawn_workers(ctx: Arc<WorkerContext>, count: u32) -> JoinSet<()> {
    let mut workers = JoinSet::new();
    for worker_id in 0..count as usize {
        workers.spawn(run_worker(Arc::clone(&ctx), worker_id));
    }
    workers
}
