use std::sync::Arc;

use tracing::{debug, info};

use crate::cancel::RunContext;
use crate::dispatcher::Dispatcher;
use crate::events::{RequestEvent, RequestOutcome};
use crate::metrics::{ACTIVE_WORKERS, PAYLOAD_FAILURES_TOTAL};
use crate::payload::PayloadGenerator;
use crate::stats::RunStats;

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    QuotaExhausted,
    Cancelled,
}

/// Summary returned by a finished worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub exit: WorkerExit,
    pub dispatched: u64,
    pub generation_failures: u64,
}

/// Holds the `active_workers` gauge up for as long as a worker runs,
/// including when it unwinds.
struct ActiveWorkerGuard;

impl ActiveWorkerGuard {
    fn new() -> Self {
        ACTIVE_WORKERS.inc();
        Self
    }
}

impl Drop for ActiveWorkerGuard {
    fn drop(&mut self) {
        ACTIVE_WORKERS.dec();
    }
}

/// One worker's share of the run: its id, quota and everything it needs to
/// generate and send requests.
pub struct WorkerTask {
    pub worker_id: usize,
    pub quota: u64,
    pub url: Arc<str>,
    pub generator: PayloadGenerator,
    pub dispatcher: Arc<Dispatcher>,
    pub stats: Arc<RunStats>,
    pub ctx: RunContext,
}

impl WorkerTask {
    /// Sends up to `quota` requests, one at a time.
    ///
    /// Cancellation is checked before each iteration; a request already in
    /// flight is cut short by the dispatcher. A payload that fails to
    /// generate uses up its iteration without dispatching anything.
    pub async fn run(mut self) -> WorkerReport {
        debug!(
            worker = self.worker_id,
            quota = self.quota,
            url = %self.url,
            "Worker starting"
        );
        let _active = ActiveWorkerGuard::new();

        let mut report = WorkerReport {
            worker_id: self.worker_id,
            exit: WorkerExit::QuotaExhausted,
            dispatched: 0,
            generation_failures: 0,
        };

        for _ in 0..self.quota {
            if self.ctx.is_cancelled() {
                report.exit = WorkerExit::Cancelled;
                break;
            }

            let payload = match self.generator.generate() {
                Ok(payload) => payload,
                Err(e) => {
                    PAYLOAD_FAILURES_TOTAL.inc();
                    self.stats.record_generation_failure();
                    self.dispatcher.sink().record(&RequestEvent::generation_failed(
                        self.worker_id,
                        &self.url,
                        e.to_string(),
                    ));
                    report.generation_failures += 1;
                    // Nothing awaited on this path; let other tasks run.
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            let result = self
                .dispatcher
                .dispatch(&self.ctx, self.worker_id, &self.url, payload)
                .await;
            self.stats
                .record_outcome(result.outcome, result.status.map(|_| result.latency));
            report.dispatched += 1;

            if result.outcome == RequestOutcome::Cancelled {
                report.exit = WorkerExit::Cancelled;
                break;
            }
        }

        info!(
            worker = self.worker_id,
            dispatched = report.dispatched,
            generation_failures = report.generation_failures,
            exit = ?report.exit,
            "Worker stopped"
        );
        report
    }
}
