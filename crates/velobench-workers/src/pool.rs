//! Worker pool service

use crate::worker::{worker_loop, WorkerDeps};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;
use velobench_bus::Puller;
use velobench_core::types::{Credit, WorkerId};
use velobench_core::Result;
use velobench_service::{Service, ServiceContext};

/// Spawns one task per worker seat and waits for the pool to drain.
pub struct WorkerPoolService {
    seats: Vec<(WorkerId, mpsc::Receiver<Credit>)>,
    shared: Puller<Credit>,
    deps: WorkerDeps,
}

impl WorkerPoolService {
    pub fn new(
        seats: Vec<(WorkerId, mpsc::Receiver<Credit>)>,
        shared: Puller<Credit>,
        deps: WorkerDeps,
    ) -> Self {
        Self {
            seats,
            shared,
            deps,
        }
    }
}

#[async_trait]
impl Service for WorkerPoolService {
    fn name(&self) -> &'static str {
        "workers"
    }

    async fn run(&mut self, ctx: ServiceContext) -> Result<()> {
        let seats = std::mem::take(&mut self.seats);
        info!(workers = seats.len(), "worker pool starting");
        let mut handles = Vec::with_capacity(seats.len());
        for (worker_id, lane) in seats {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                self.shared.clone(),
                lane,
                self.deps.clone(),
                ctx.shutdown.clone(),
            )));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

