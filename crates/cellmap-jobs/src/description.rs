//! Job descriptions and batches.
//!
//! A [`JobDescription`] is the complete, self-contained unit of work: its
//! numeric id, the input files grouped by name, the output files it must
//! write, and the partition it covers. Descriptions are created once by a
//! family's partitioner and persisted as a [`Batch`] so that individual
//! jobs can be re-run later from exactly the same declaration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::experiment::Experiment;
use crate::storage;

/// The slice of the experiment a job covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Partition {
    /// One acquisition cycle.
    Cycle {
        /// Cycle name.
        cycle: String,
    },
    /// One imaging site of one well.
    Site {
        plate: String,
        well: String,
        site_y: u32,
        site_x: u32,
    },
}

/// Declaration of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    /// Positive id, unique within the batch.
    pub id: u32,
    /// Input files, grouped by name.
    pub inputs: BTreeMap<String, Vec<PathBuf>>,
    /// Output files, grouped by name.
    pub outputs: BTreeMap<String, Vec<PathBuf>>,
    /// Partition metadata.
    pub partition: Partition,
}

impl JobDescription {
    /// Files of one input group, empty if the group is absent.
    #[must_use]
    pub fn input(&self, group: &str) -> &[PathBuf] {
        self.inputs.get(group).map_or(&[], Vec::as_slice)
    }

    /// Files of one output group, empty if the group is absent.
    #[must_use]
    pub fn output(&self, group: &str) -> &[PathBuf] {
        self.outputs.get(group).map_or(&[], Vec::as_slice)
    }

    /// The single file of an output group.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::PartitionInconsistency`] if the group does not
    /// declare exactly one file.
    pub fn single_output(&self, group: &str) -> Result<&Path, JobError> {
        match self.output(group) {
            [path] => Ok(path),
            other => Err(JobError::PartitionInconsistency {
                job_id: self.id,
                reason: format!(
                    "output \"{group}\" declares {} files, expected 1",
                    other.len()
                ),
            }),
        }
    }

    /// Verify every declared input file exists.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::PartitionInconsistency`] naming the first
    /// missing file.
    pub fn check_inputs(&self) -> Result<(), JobError> {
        for (group, paths) in &self.inputs {
            if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
                return Err(JobError::PartitionInconsistency {
                    job_id: self.id,
                    reason: format!("input \"{group}\" file {} does not exist", missing.display()),
                });
            }
        }
        Ok(())
    }
}

/// All jobs of one family for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Family name.
    pub family: String,
    /// Jobs ordered by id.
    pub jobs: Vec<JobDescription>,
}

impl Batch {
    /// File name of a persisted batch inside the family directory.
    pub const FILE: &str = "batch.json";

    /// Location of the batch file of `family`.
    #[must_use]
    pub fn path(experiment: &Experiment, family: &str) -> PathBuf {
        experiment.family_dir(family).join(Self::FILE)
    }

    /// Look up a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJob`] if no job has this id.
    pub fn job(&self, id: u32) -> Result<&JobDescription, JobError> {
        self.jobs
            .iter()
            .find(|job| job.id == id)
            .ok_or(JobError::UnknownJob { id })
    }

    /// Persist the batch in the family directory.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] or [`JobError::Json`].
    pub fn save(&self, experiment: &Experiment) -> Result<PathBuf, JobError> {
        let path = Self::path(experiment, &self.family);
        storage::write_json(&path, self)?;
        tracing::info!(family = %self.family, jobs = self.jobs.len(), path = %path.display(), "saved batch");
        Ok(path)
    }

    /// Load the persisted batch of `family`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] or [`JobError::Json`].
    pub fn load(experiment: &Experiment, family: &str) -> Result<Self, JobError> {
        storage::read_json(&Self::path(experiment, family))
    }
}
