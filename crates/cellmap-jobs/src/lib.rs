//! cellmap-jobs: partition experiments into independent jobs, run them,
//! and collect their outputs.
//!
//! A job family ([`JobFamily`]) turns the on-disk [`Experiment`] into a
//! [`Batch`] of self-contained [`JobDescription`]s. Each job can be run
//! in isolation, on this machine or elsewhere, from its description alone;
//! it writes only its declared outputs and records its status next to the
//! batch. Families with a collection step merge the outputs of completed
//! jobs once the batch is terminal.
//!
//! Families:
//!
//! | name | partition | output |
//! |---|---|---|
//! | `metaconvert` | cycle | image metadata JSON |
//! | `imextract` | cycle | grayscale PNG per site and channel |
//! | `jterator` | imaging site | per-site results, merged CSV/GeoJSON |

pub mod backend;
pub mod description;
pub mod error;
pub mod experiment;
pub mod family;
pub mod filename;
pub mod imextract;
pub mod jterator;
pub mod metaconvert;
pub mod status;
pub mod storage;

pub use backend::{LocalBackend, init};
pub use description::{Batch, JobDescription, Partition};
pub use error::JobError;
pub use experiment::{Cycle, Experiment, ExperimentConfig};
pub use family::{FAMILIES, JobFamily, open, partition};
pub use filename::{ImageName, NameTemplate};
pub use imextract::ImageExtractor;
pub use jterator::{ImageAnalysis, SiteResult};
pub use metaconvert::{ImageMetadata, MetadataConverter, MetadataFormat};
pub use status::{BatchReport, JobOutcome, JobStatus};
