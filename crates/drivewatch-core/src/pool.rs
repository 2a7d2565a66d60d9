// # Worker Pool
//
// Bounded fan-out of one check per subscriber per cycle.
//
// Jobs sit in a shared queue drained by at most `workers` tasks. Each job
// runs on its own task so that a panic is caught at the task boundary and
// turned into a failed report; the worker then moves on to the next job.
// A cycle completes only once one report per dispatched job is collected.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{error, warn};

use crate::engine::check::CheckReport;
use crate::subscriptions::CheckJob;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `check` once for every job and collect every report
    pub async fn run_cycle<F, Fut>(&self, jobs: Vec<CheckJob>, check: F) -> Vec<CheckReport>
    where
        F: Fn(CheckJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckReport> + Send + 'static,
    {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }

        let dispatched: Vec<(String, String)> = jobs
            .iter()
            .map(|job| (job.subscription.id().to_string(), job.subscription.label()))
            .collect();

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let check = Arc::new(check);
        let (result_tx, mut result_rx) = mpsc::channel::<CheckReport>(total);

        for _ in 0..self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let check = Arc::clone(&check);
            let result_tx = result_tx.clone();

            tokio::spawn(async move {
                loop {
                    let Some(job) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let id = job.subscription.id().to_string();
                    let label = job.subscription.label();

                    let report = match tokio::spawn((*check)(job)).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!("[{}] Check task aborted: {}", label, e);
                            CheckReport::lost(id, label, format!("check task aborted: {}", e))
                        }
                    };

                    if result_tx.send(report).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut reports = Vec::with_capacity(total);
        while let Some(report) = result_rx.recv().await {
            reports.push(report);
        }

        if reports.len() < total {
            let seen: HashSet<String> = reports.iter().map(|r| r.id.clone()).collect();
            for (id, label) in dispatched {
                if !seen.contains(&id) {
                    warn!("[{}] No result collected for this cycle", label);
                    reports.push(CheckReport::lost(id, label, "no result collected"));
                }
            }
        }

        reports
    }
}
