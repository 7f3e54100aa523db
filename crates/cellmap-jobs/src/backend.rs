//! Local execution of whole batches.
//!
//! Jobs of a batch are independent, so they run in parallel on a rayon
//! pool. A failing job is recorded and logged; its siblings carry on.

use rayon::prelude::*;

use crate::description::Batch;
use crate::error::JobError;
use crate::experiment::Experiment;
use crate::family::{JobFamily, partition, run};
use crate::status::{BatchReport, JobOutcome};

/// Partition `family` and persist the new batch, discarding the status
/// records of any earlier batch.
///
/// # Errors
///
/// Propagates partitioning and write errors.
pub fn init(family: &dyn JobFamily, experiment: &Experiment) -> Result<Batch, JobError> {
    let batch = partition(family)?;
    BatchReport::reset(experiment, family.name())?;
    batch.save(experiment)?;
    Ok(batch)
}

/// Runs batches on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend {
    threads: Option<usize>,
}

impl LocalBackend {
    /// A backend using `threads` worker threads, or rayon's default pool
    /// when `None`.
    #[must_use]
    pub const fn new(threads: Option<usize>) -> Self {
        Self { threads }
    }

    /// Run every job of `batch` and report the outcome of each.
    #[must_use]
    pub fn run_batch(
        &self,
        family: &dyn JobFamily,
        experiment: &Experiment,
        batch: &Batch,
    ) -> BatchReport {
        let run_all = || -> Vec<JobOutcome> {
            batch
                .jobs
                .par_iter()
                .map(|job| run(family, experiment, job))
                .collect()
        };
        let outcomes = match self.threads {
            Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => pool.install(run_all),
                Err(e) => {
                    tracing::warn!(error = %e, "could not build thread pool, using the global pool");
                    run_all()
                }
            },
            None => run_all(),
        };

        let report = BatchReport {
            family: batch.family.clone(),
            outcomes,
        };
        let failed = report.failed();
        if failed.is_empty() {
            tracing::info!(family = %batch.family, jobs = batch.jobs.len(), "batch complete");
        } else {
            tracing::error!(family = %batch.family, ?failed, "batch finished with failed jobs");
        }
        report
    }

    /// Partition, run every job, and collect when the family defines a
    /// collection step.
    ///
    /// # Errors
    ///
    /// Returns partitioning and collection errors. Failed jobs are not
    /// errors; they appear in the returned report.
    pub fn submit(
        &self,
        family: &dyn JobFamily,
        experiment: &Experiment,
    ) -> Result<BatchReport, JobError> {
        let batch = init(family, experiment)?;
        let report = self.run_batch(family, experiment, &batch);
        if family.has_collector() {
            family.collect_job_output(&batch, &report)?;
        }
        Ok(report)
    }
}
