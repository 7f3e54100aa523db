//! Error types for job partitioning, execution and collection.

use std::path::PathBuf;

use cellmap_pipeline::{HandleError, PipelineError, ShapeError};

/// Errors raised by job families, the runner, and the batch backend.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A job's declared inputs do not match what is on disk, or the data
    /// of a partition cannot be processed as declared.
    #[error("job {job_id}: partition is inconsistent: {reason}")]
    PartitionInconsistency {
        /// Identifier of the affected job.
        job_id: u32,
        /// What is missing or inconsistent.
        reason: String,
    },

    /// The family does not implement an optional operation.
    #[error("family \"{family}\" does not support \"{operation}\"")]
    UnsupportedOperation {
        /// Family name.
        family: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// No handler exists for the requested microscope metadata format.
    #[error("metadata format \"{format}\" is not supported, expected one of: {}", supported.join(", "))]
    UnsupportedFormat {
        /// Requested format name.
        format: String,
        /// Known format names.
        supported: Vec<&'static str>,
    },

    /// An image name template is malformed.
    #[error("invalid image name template \"{template}\": {reason}")]
    InvalidTemplate {
        /// The template text.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No job family is registered under this name.
    #[error("unknown job family \"{name}\", expected one of: {}", known.join(", "))]
    UnknownFamily {
        /// Requested family name.
        name: String,
        /// Known family names.
        known: Vec<&'static str>,
    },

    /// The batch has no job with this id.
    #[error("batch has no job {id}")]
    UnknownJob {
        /// Requested job id.
        id: u32,
    },

    /// Collection was requested before every job reached a terminal state.
    #[error("batch is not finished, jobs still pending: {pending:?}")]
    BatchIncomplete {
        /// Ids of jobs that are waiting or running.
        pending: Vec<u32>,
    },

    /// Building or running the image analysis pipeline failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Object data could not be derived or merged.
    #[error(transparent)]
    Objects(#[from] HandleError),

    /// An image or table has an inconsistent shape.
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// A results table could not be serialized.
    #[error(transparent)]
    Export(#[from] cellmap_export::ExportError),

    /// A filesystem operation failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be read or written.
    #[error("{}: {source}", path.display())]
    Json {
        /// Path of the document.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A YAML configuration file could not be parsed.
    #[error("{}: {source}", path.display())]
    Yaml {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_yaml::Error,
    },

    /// An image file could not be decoded or encoded.
    #[error("{}: {source}", path.display())]
    Image {
        /// Path of the image.
        path: PathBuf,
        /// Underlying codec error.
        #[source]
        source: image::ImageError,
    },
}

impl JobError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
