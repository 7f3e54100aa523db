//! Job status tracking.
//!
//! Each job records its status in `<family>/status/job_<id>.json`. The
//! files are written atomically, so jobs running in separate processes
//! (or on separate cluster nodes) can report independently, and the
//! collector can later decide whether the batch is terminal.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::description::Batch;
use crate::error::JobError;
use crate::experiment::Experiment;
use crate::storage;

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Declared but not started.
    Waiting,
    /// Started and not yet finished.
    Running,
    /// Finished and wrote all declared outputs.
    Complete,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Whether the job will not change state again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Recorded outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub id: u32,
    pub status: JobStatus,
    /// Error message of a failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    #[must_use]
    pub const fn new(id: u32, status: JobStatus) -> Self {
        Self {
            id,
            status,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(id: u32, error: &JobError) -> Self {
        Self {
            id,
            status: JobStatus::Failed,
            error: Some(error.to_string()),
        }
    }

    fn path(experiment: &Experiment, family: &str, id: u32) -> PathBuf {
        experiment
            .family_dir(family)
            .join("status")
            .join(format!("job_{id}.json"))
    }

    /// Record the outcome of a job of `family`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] or [`JobError::Json`].
    pub fn save(&self, experiment: &Experiment, family: &str) -> Result<(), JobError> {
        storage::write_json(&Self::path(experiment, family, self.id), self)
    }

    /// Read the recorded outcome of a job, `Waiting` if none was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] or [`JobError::Json`] if a record exists
    /// but cannot be read.
    pub fn load(experiment: &Experiment, family: &str, id: u32) -> Result<Self, JobError> {
        let path = Self::path(experiment, family, id);
        if path.is_file() {
            storage::read_json(&path)
        } else {
            Ok(Self::new(id, JobStatus::Waiting))
        }
    }
}

/// Outcomes of every job of a batch, in job order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub family: String,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchReport {
    /// Gather the recorded outcome of every job in `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] or [`JobError::Json`] if a status record
    /// cannot be read.
    pub fn load(experiment: &Experiment, batch: &Batch) -> Result<Self, JobError> {
        let outcomes = batch
            .jobs
            .iter()
            .map(|job| JobOutcome::load(experiment, &batch.family, job.id))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            family: batch.family.clone(),
            outcomes,
        })
    }

    /// Forget the recorded status of every job of `family`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] if existing records cannot be removed.
    pub fn reset(experiment: &Experiment, family: &str) -> Result<(), JobError> {
        let dir = experiment.family_dir(family).join("status");
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JobError::io(dir, e)),
        }
    }

    /// Whether every job has completed or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_terminal())
    }

    /// Ids of jobs that are waiting or running.
    #[must_use]
    pub fn pending(&self) -> Vec<u32> {
        self.ids(|s| !s.is_terminal())
    }

    /// Ids of completed jobs.
    #[must_use]
    pub fn completed(&self) -> Vec<u32> {
        self.ids(|s| s == JobStatus::Complete)
    }

    /// Ids of failed jobs.
    #[must_use]
    pub fn failed(&self) -> Vec<u32> {
        self.ids(|s| s == JobStatus::Failed)
    }

    /// Whether every job completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == JobStatus::Complete)
    }

    /// Fail with [`JobError::BatchIncomplete`] unless the batch is
    /// terminal.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn require_terminal(&self) -> Result<(), JobError> {
        if self.is_terminal() {
            Ok(())
        } else {
            Err(JobError::BatchIncomplete {
                pending: self.pending(),
            })
        }
    }

    fn ids(&self, keep: impl Fn(JobStatus) -> bool) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter(|o| keep(o.status))
            .map(|o| o.id)
            .collect()
    }
}
