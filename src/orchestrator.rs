//! Load test orchestration.
//!
//! A [`LoadTest`] moves through `Loaded -> Running -> Completed | Interrupted`:
//!
//! - **Loaded**: the template is parsed and the parameters validated. Any
//!   failure here is returned before a single request is sent.
//! - **Running**: the total request count is partitioned, one task per
//!   partition entry is spawned, and the run deadline is armed.
//! - **Completed / Interrupted**: reached only after every worker task has
//!   returned, so nothing is still sending when the outcome is reported.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::cancel::{CancelCause, RunContext};
use crate::dispatcher::Dispatcher;
use crate::partition::{partition, PartitionError};
use crate::payload::PayloadGenerator;
use crate::placeholder::{Expander, SequenceCounter};
use crate::stats::{RunReport, RunStats};
use crate::template::{Template, TemplateError};
use crate::worker::{WorkerExit, WorkerTask};

/// Errors that stop a run before any worker starts.
#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("target URL is required")]
    MissingTargetUrl,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub target_url: String,
    pub total_requests: u64,
    pub workers: usize,
    pub template_path: PathBuf,
    /// Time after which the run is interrupted
    pub deadline: Duration,
    /// Base seed for deterministic payloads; worker `i` uses `seed + i`
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Loaded,
    Running,
    Completed,
    Interrupted,
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        elapsed: Duration,
        report: RunReport,
    },
    Interrupted {
        elapsed: Duration,
        cause: CancelCause,
        report: RunReport,
    },
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed { .. } => RunState::Completed,
            RunOutcome::Interrupted { .. } => RunState::Interrupted,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            RunOutcome::Completed { elapsed, .. } | RunOutcome::Interrupted { elapsed, .. } => {
                *elapsed
            }
        }
    }

    pub fn report(&self) -> &RunReport {
        match self {
            RunOutcome::Completed { report, .. } | RunOutcome::Interrupted { report, .. } => report,
        }
    }
}

/// A validated, ready-to-run load test.
pub struct LoadTest {
    params: RunParams,
    template: Arc<Template>,
    counter: Arc<SequenceCounter>,
    state: RunState,
}

impl LoadTest {
    /// Validates the parameters and reads the template file.
    pub fn load(params: RunParams) -> Result<Self, LoadTestError> {
        validate(&params)?;
        let template = Template::from_file(&params.template_path)?;
        Self::with_template(params, template)
    }

    /// Like [`load`](Self::load) with an already parsed template.
    pub fn with_template(params: RunParams, template: Template) -> Result<Self, LoadTestError> {
        validate(&params)?;
        info!(
            url = %params.target_url,
            total_requests = params.total_requests,
            workers = params.workers,
            fields = template.len(),
            "Load test loaded"
        );
        Ok(Self {
            params,
            template: Arc::new(template),
            counter: Arc::new(SequenceCounter::new()),
            state: RunState::Loaded,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// The counter shared by every worker's `COUNTER_` expansions.
    pub fn counter(&self) -> &Arc<SequenceCounter> {
        &self.counter
    }

    /// Runs every worker to completion or cancellation.
    ///
    /// Cancelling `ctx` (or reaching the deadline) interrupts the run; this
    /// future still waits for all workers to exit before returning.
    pub async fn run(
        mut self,
        ctx: RunContext,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<RunOutcome, LoadTestError> {
        let quotas = partition(self.params.total_requests, self.params.workers)?;
        self.state = RunState::Running;

        let start = Instant::now();
        let stats = Arc::new(RunStats::new());
        let url: Arc<str> = Arc::from(self.params.target_url.as_str());
        let cancelled_before_start = ctx.is_cancelled();

        let deadline_guard = {
            let ctx = ctx.clone();
            let deadline = self.params.deadline;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        warn!(deadline_secs = deadline.as_secs_f64(), "Run deadline reached, stopping workers");
                        ctx.cancel(CancelCause::Deadline);
                    }
                    _ = ctx.cancelled() => {}
                }
            })
        };

        info!(quotas = ?quotas, "Starting workers");

        let mut workers = JoinSet::new();
        for (worker_id, quota) in quotas.into_iter().enumerate() {
            let expander = match self.params.seed {
                Some(seed) => {
                    Expander::seeded(self.counter.clone(), seed.wrapping_add(worker_id as u64))
                }
                None => Expander::new(self.counter.clone()),
            };
            let task = WorkerTask {
                worker_id,
                quota,
                url: url.clone(),
                generator: PayloadGenerator::new(self.template.clone(), expander),
                dispatcher: dispatcher.clone(),
                stats: stats.clone(),
                ctx: ctx.clone(),
            };
            workers.spawn(task.run());
        }

        // Drain every worker, even after cancellation. A worker that died
        // never finished its quota, so the run cannot complete.
        let mut interrupted = cancelled_before_start;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => interrupted |= report.exit == WorkerExit::Cancelled,
                Err(e) => {
                    error!(error = %e, "Worker task failed, stopping remaining workers");
                    stats.record_worker_panic();
                    ctx.cancel(CancelCause::WorkerPanicked);
                    interrupted = true;
                }
            }
        }
        deadline_guard.abort();

        let elapsed = start.elapsed();
        let report = stats.report();

        let outcome = if interrupted {
            self.state = RunState::Interrupted;
            let cause = ctx.cause().unwrap_or(CancelCause::Requested);
            warn!(
                cause = %cause,
                elapsed_secs = elapsed.as_secs_f64(),
                dispatched = report.dispatched,
                "Test interrupted"
            );
            RunOutcome::Interrupted {
                elapsed,
                cause,
                report,
            }
        } else {
            self.state = RunState::Completed;
            info!(
                elapsed_secs = elapsed.as_secs_f64(),
                dispatched = report.dispatched,
                "Test completed"
            );
            RunOutcome::Completed { elapsed, report }
        };

        Ok(outcome)
    }
}

fn validate(params: &RunParams) -> Result<(), LoadTestError> {
    if params.target_url.trim().is_empty() {
        return Err(LoadTestError::MissingTargetUrl);
    }
    if params.workers == 0 {
        return Err(PartitionError::InvalidWorkerCount(params.workers).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunParams {
        RunParams {
            target_url: "http://127.0.0.1:9/".to_string(),
            total_requests: 10,
            workers: 2,
            template_path: PathBuf::from("unused.json"),
            deadline: Duration::from_secs(5),
            seed: None,
        }
    }

    fn template() -> Template {
        Template::from_json(r#"{"template": {"a": "b"}}"#).unwrap()
    }

    #[test]
    fn empty_url_is_rejected() {
        let mut p = params();
        p.target_url = "  ".to_string();
        assert!(matches!(
            LoadTest::with_template(p, template()),
            Err(LoadTestError::MissingTargetUrl)
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut p = params();
        p.workers = 0;
        assert!(matches!(
            LoadTest::with_template(p, template()),
            Err(LoadTestError::Partition(PartitionError::InvalidWorkerCount(0)))
        ));
    }

    #[test]
    fn missing_template_file_is_fatal() {
        let mut p = params();
        p.template_path = PathBuf::from("/no/such/template.json");
        assert!(matches!(
            LoadTest::load(p),
            Err(LoadTestError::Template(TemplateError::Read { .. }))
        ));
    }

    #[test]
    fn loaded_state_after_validation() {
        let test = LoadTest::with_template(params(), template()).unwrap();
        assert_eq!(test.state(), RunState::Loaded);
        assert_eq!(test.counter().peek(), 1);
    }
}
