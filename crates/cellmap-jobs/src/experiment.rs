//! On-disk experiment layout and configuration.
//!
//! ```text
//! <root>/
//!   experiment.yaml                      optional ExperimentConfig
//!   pipeline.yaml                        image analysis description
//!   cycles/<cycle>/uploads/images/       microscope image files
//!   cycles/<cycle>/uploads/additional/   microscope side files
//!   cycles/<cycle>/uploads/ome_xml/      OME-XML metadata
//!   cycles/<cycle>/metadata/             converted image metadata
//!   cycles/<cycle>/images/               extracted single-plane images
//!   <family>/batch.json                  partitioned jobs
//!   <family>/status/job_<id>.json        per-job status
//! ```

use std::path::{Path, PathBuf};

use cellmap_pipeline::PipelineDescription;
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::storage;

/// Experiment-wide settings read from `experiment.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Cycle names in acquisition order. Empty means "discover the
    /// subdirectories of `cycles/` in sorted order".
    pub cycles: Vec<String>,

    /// Name template of extracted images, see [`crate::filename`].
    pub image_file_format: String,

    /// Simplification tolerance for object outlines, in pixels.
    pub outline_tolerance: f64,

    /// Name of the microscope metadata handler used by `metaconvert`.
    pub metadata_format: String,
}

impl ExperimentConfig {
    /// Default extracted image name template.
    pub const DEFAULT_IMAGE_FILE_FORMAT: &str = "{plate}_{well}_y{y:03}_x{x:03}_{channel}.png";

    /// Default outline simplification tolerance.
    pub const DEFAULT_OUTLINE_TOLERANCE: f64 = 1.0;

    /// Default metadata handler.
    pub const DEFAULT_METADATA_FORMAT: &str = "default";
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            cycles: Vec::new(),
            image_file_format: Self::DEFAULT_IMAGE_FILE_FORMAT.to_string(),
            outline_tolerance: Self::DEFAULT_OUTLINE_TOLERANCE,
            metadata_format: Self::DEFAULT_METADATA_FORMAT.to_string(),
        }
    }
}

/// One acquisition cycle and its directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Cycle name (directory name under `cycles/`).
    pub name: String,
    dir: PathBuf,
}

impl Cycle {
    /// Root directory of the cycle.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn image_upload_dir(&self) -> PathBuf {
        self.dir.join("uploads").join("images")
    }

    #[must_use]
    pub fn additional_upload_dir(&self) -> PathBuf {
        self.dir.join("uploads").join("additional")
    }

    #[must_use]
    pub fn ome_xml_dir(&self) -> PathBuf {
        self.dir.join("uploads").join("ome_xml")
    }

    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.dir.join("metadata")
    }

    /// File written by `metaconvert` and read by `imextract`.
    #[must_use]
    pub fn metadata_file(&self) -> PathBuf {
        self.metadata_dir().join("image_metadata.json")
    }

    /// Directory of extracted images read by `jterator`.
    #[must_use]
    pub fn image_dir(&self) -> PathBuf {
        self.dir.join("images")
    }
}

/// An experiment directory together with its configuration.
#[derive(Debug, Clone)]
pub struct Experiment {
    root: PathBuf,
    config: ExperimentConfig,
}

impl Experiment {
    /// Configuration file name at the experiment root.
    pub const CONFIG_FILE: &str = "experiment.yaml";

    /// Pipeline description file name at the experiment root.
    pub const PIPELINE_FILE: &str = "pipeline.yaml";

    /// Open an experiment, reading `experiment.yaml` when present.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] or [`JobError::Yaml`] if the
    /// configuration file exists but cannot be read or parsed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, JobError> {
        let root = root.into();
        let path = root.join(Self::CONFIG_FILE);
        let config = if path.is_file() {
            storage::read_yaml(&path)?
        } else {
            ExperimentConfig::default()
        };
        Ok(Self { root, config })
    }

    /// Build an experiment from an explicit configuration.
    #[must_use]
    pub fn with_config(root: impl Into<PathBuf>, config: ExperimentConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Mutable access, used to apply command-line overrides.
    pub const fn config_mut(&mut self) -> &mut ExperimentConfig {
        &mut self.config
    }

    /// Cycles in acquisition order.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] if `cycles/` must be discovered and cannot
    /// be listed.
    pub fn cycles(&self) -> Result<Vec<Cycle>, JobError> {
        let base = self.root.join("cycles");
        let names = if self.config.cycles.is_empty() {
            storage::list_dirs(&base)?
                .into_iter()
                .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect()
        } else {
            self.config.cycles.clone()
        };
        Ok(names
            .into_iter()
            .map(|name| Cycle {
                dir: base.join(&name),
                name,
            })
            .collect())
    }

    /// Working directory of a job family.
    #[must_use]
    pub fn family_dir(&self, family: &str) -> PathBuf {
        self.root.join(family)
    }

    /// Read and validate `pipeline.yaml`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Io`] or [`JobError::Yaml`] if the file cannot
    /// be read or parsed.
    pub fn load_pipeline(&self) -> Result<PipelineDescription, JobError> {
        storage::read_yaml(&self.root.join(Self::PIPELINE_FILE))
    }
}
