//! The job family contract and the single-job runner.
//!
//! A family partitions an experiment into independent jobs, runs one job
//! from its description alone, and optionally merges the outputs of a
//! finished batch. Families are looked up by name with [`open`].

use tracing::info_span;

use crate::description::{Batch, JobDescription};
use crate::error::JobError;
use crate::experiment::Experiment;
use crate::imextract::ImageExtractor;
use crate::jterator::ImageAnalysis;
use crate::metaconvert::MetadataConverter;
use crate::status::{BatchReport, JobOutcome, JobStatus};

/// Names accepted by [`open`], in workflow order.
pub const FAMILIES: [&str; 3] = [
    MetadataConverter::NAME,
    ImageExtractor::NAME,
    ImageAnalysis::NAME,
];

/// A kind of distributed work.
pub trait JobFamily: Send + Sync {
    /// Family name, also the name of its working directory.
    fn name(&self) -> &'static str;

    /// Partition the experiment into jobs with ids `1..=n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the experiment layout cannot be listed.
    fn create_job_descriptions(&self) -> Result<Vec<JobDescription>, JobError>;

    /// Run one job, writing exactly its declared outputs.
    ///
    /// # Errors
    ///
    /// Any error fails this job only.
    fn run_job(&self, job: &JobDescription) -> Result<(), JobError>;

    /// Whether [`JobFamily::collect_job_output`] is implemented.
    fn has_collector(&self) -> bool {
        false
    }

    /// Merge the outputs of the completed jobs of a terminal batch.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnsupportedOperation`] unless overridden.
    fn collect_job_output(&self, batch: &Batch, report: &BatchReport) -> Result<(), JobError> {
        let _ = (batch, report);
        Err(JobError::UnsupportedOperation {
            family: self.name(),
            operation: "collect_job_output",
        })
    }

    /// Compute statistics over the collected outputs.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnsupportedOperation`] unless overridden.
    fn apply_statistics(&self, batch: &Batch) -> Result<(), JobError> {
        let _ = batch;
        Err(JobError::UnsupportedOperation {
            family: self.name(),
            operation: "apply_statistics",
        })
    }
}

/// Construct a family by name for `experiment`.
///
/// # Errors
///
/// Returns [`JobError::UnknownFamily`] for unknown names, or the
/// family's own construction error (unsupported metadata format,
/// invalid pipeline description, ...).
pub fn open(name: &str, experiment: &Experiment) -> Result<Box<dyn JobFamily>, JobError> {
    match name {
        MetadataConverter::NAME => Ok(Box::new(MetadataConverter::new(experiment.clone())?)),
        ImageExtractor::NAME => Ok(Box::new(ImageExtractor::new(experiment.clone()))),
        ImageAnalysis::NAME => Ok(Box::new(ImageAnalysis::new(experiment.clone())?)),
        _ => Err(JobError::UnknownFamily {
            name: name.to_string(),
            known: FAMILIES.to_vec(),
        }),
    }
}

/// Partition an experiment into a batch.
///
/// # Errors
///
/// Propagates partitioning errors. Returns
/// [`JobError::PartitionInconsistency`] if the family did not number its
/// jobs `1..=n`.
pub fn partition(family: &dyn JobFamily) -> Result<Batch, JobError> {
    let jobs = family.create_job_descriptions()?;
    for (expected, job) in (1..).zip(&jobs) {
        if job.id != expected {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: format!("job ids must be consecutive from 1, expected {expected}"),
            });
        }
    }
    tracing::info!(family = family.name(), jobs = jobs.len(), "partitioned experiment");
    Ok(Batch {
        family: family.name().to_string(),
        jobs,
    })
}

/// Run one job and record its status.
///
/// The job is marked running, its declared inputs are checked, and the
/// family runs it. The returned outcome is also persisted; a failure to
/// persist it is logged and reflected in the outcome.
pub fn run(family: &dyn JobFamily, experiment: &Experiment, job: &JobDescription) -> JobOutcome {
    let span = info_span!("job", family = family.name(), id = job.id);
    let _entered = span.enter();

    let result = JobOutcome::new(job.id, JobStatus::Running)
        .save(experiment, family.name())
        .and_then(|()| job.check_inputs())
        .and_then(|()| {
            tracing::info!("job started");
            family.run_job(job)
        });

    let outcome = match result {
        Ok(()) => {
            tracing::info!("job complete");
            JobOutcome::new(job.id, JobStatus::Complete)
        }
        Err(e) => {
            tracing::error!(error = %e, "job failed");
            JobOutcome::failed(job.id, &e)
        }
    };
    match outcome.save(experiment, family.name()) {
        Ok(()) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "could not record job status");
            JobOutcome::failed(job.id, &e)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::description::Partition;

    struct Counting {
        jobs: u32,
        first_id: u32,
    }

    impl JobFamily for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn create_job_descriptions(&self) -> Result<Vec<JobDescription>, JobError> {
            Ok((0..self.jobs)
                .map(|i| JobDescription {
                    id: self.first_id + i,
                    inputs: BTreeMap::new(),
                    outputs: BTreeMap::new(),
                    partition: Partition::Cycle {
                        cycle: format!("c{i}"),
                    },
                })
                .collect())
        }

        fn run_job(&self, job: &JobDescription) -> Result<(), JobError> {
            if job.id == 2 {
                Err(JobError::UnknownJob { id: job.id })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn unknown_family_lists_known_names() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = Experiment::open(dir.path()).unwrap();
        let err = open("illuminati", &experiment).err().unwrap();
        assert!(matches!(err, JobError::UnknownFamily { .. }));
        assert!(err.to_string().contains("metaconvert, imextract, jterator"));
    }

    #[test]
    fn optional_operations_are_unsupported_by_default() {
        let family = Counting {
            jobs: 1,
            first_id: 1,
        };
        let batch = partition(&family).unwrap();
        let report = BatchReport {
            family: "counting".into(),
            outcomes: vec![],
        };
        assert!(!family.has_collector());
        assert!(matches!(
            family.collect_job_output(&batch, &report),
            Err(JobError::UnsupportedOperation {
                family: "counting",
                operation: "collect_job_output"
            })
        ));
        assert!(matches!(
            family.apply_statistics(&batch),
            Err(JobError::UnsupportedOperation {
                operation: "apply_statistics",
                ..
            })
        ));
    }

    #[test]
    fn partition_rejects_ids_not_starting_at_one() {
        let family = Counting {
            jobs: 2,
            first_id: 0,
        };
        assert!(matches!(
            partition(&family),
            Err(JobError::PartitionInconsistency { job_id: 0, .. })
        ));
    }

    #[test]
    fn run_records_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = Experiment::open(dir.path()).unwrap();
        let family = Counting {
            jobs: 2,
            first_id: 1,
        };
        let batch = partition(&family).unwrap();

        assert_eq!(
            run(&family, &experiment, &batch.jobs[0]).status,
            JobStatus::Complete
        );
        assert_eq!(
            run(&family, &experiment, &batch.jobs[1]).status,
            JobStatus::Failed
        );

        let report = BatchReport::load(&experiment, &batch).unwrap();
        assert_eq!(report.completed(), vec![1]);
        assert_eq!(report.failed(), vec![2]);
    }

    #[test]
    fn missing_input_fails_before_the_family_runs() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = Experiment::open(dir.path()).unwrap();
        let family = Counting {
            jobs: 1,
            first_id: 1,
        };
        let mut job = partition(&family).unwrap().jobs.remove(0);
        job.inputs
            .insert("images".into(), vec![PathBuf::from("/nonexistent/a.png")]);

        let outcome = run(&family, &experiment, &job);
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.error.unwrap().contains("partition is inconsistent"));
    }
}
