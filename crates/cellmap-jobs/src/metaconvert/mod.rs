//! Metadata conversion: one job per cycle.
//!
//! Reads the names of the uploaded microscope files of a cycle, normalizes
//! them into [`ImageMetadata`] records (plate, well, site grid position,
//! channel) and assigns every image the name it will have once extracted.
//! The records are written as a JSON array to the cycle's metadata file.

pub mod handlers;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use handlers::{MetadataFormat, RawImage, SiteIndex};

use crate::description::{JobDescription, Partition};
use crate::error::JobError;
use crate::experiment::{Cycle, Experiment};
use crate::family::JobFamily;
use crate::filename::{ImageName, NameTemplate};
use crate::storage;

/// Normalized description of one uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Uploaded file.
    pub original_file: PathBuf,
    /// File name of the extracted image.
    pub name: String,
    pub cycle: String,
    #[serde(flatten)]
    pub image: ImageName,
}

/// The `metaconvert` job family.
#[derive(Debug, Clone)]
pub struct MetadataConverter {
    experiment: Experiment,
    format: MetadataFormat,
    template: NameTemplate,
}

impl MetadataConverter {
    pub const NAME: &str = "metaconvert";

    /// Select the handler configured for `experiment`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnsupportedFormat`] if the configured metadata
    /// format is unknown, or [`JobError::InvalidTemplate`] if the image
    /// name template is malformed.
    pub fn new(experiment: Experiment) -> Result<Self, JobError> {
        let format = MetadataFormat::from_name(&experiment.config().metadata_format)?;
        let template = NameTemplate::parse(&experiment.config().image_file_format)?;
        Ok(Self {
            experiment,
            format,
            template,
        })
    }

    fn cycle(&self, job: &JobDescription) -> Result<Cycle, JobError> {
        let Partition::Cycle { cycle } = &job.partition else {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: "job does not describe a cycle".to_string(),
            });
        };
        self.experiment
            .cycles()?
            .into_iter()
            .find(|c| &c.name == cycle)
            .ok_or_else(|| JobError::PartitionInconsistency {
                job_id: job.id,
                reason: format!("cycle \"{cycle}\" no longer exists"),
            })
    }

    /// Read every uploaded file with the selected handler.
    fn format_image_metadata(&self, job: &JobDescription) -> Vec<RawImage> {
        job.input("uploaded_image_files")
            .iter()
            .filter_map(|file| {
                let image = self.format.read(file, &self.template);
                if image.is_none() {
                    tracing::warn!(
                        file = %file.display(),
                        format = self.format.name(),
                        "file name not recognized, skipping"
                    );
                }
                image
            })
            .collect()
    }

    /// Record how many side files (stage positions, plate layouts,
    /// OME-XML) came with the images. None of the handlers reads them.
    fn log_side_files(job: &JobDescription, images: &[RawImage]) {
        let additional = job.input("uploaded_additional_files").len();
        let ome_xml = job.input("ome_xml_files").len();
        tracing::debug!(images = images.len(), additional, ome_xml, "collected metadata");
    }

    fn build_filenames_for_extracted_images(
        &self,
        job: &JobDescription,
        cycle: &Cycle,
        images: Vec<ImageName>,
        files: Vec<PathBuf>,
    ) -> Result<Vec<ImageMetadata>, JobError> {
        let mut seen = BTreeSet::new();
        let mut records = Vec::with_capacity(images.len());
        for (image, original_file) in images.into_iter().zip(files) {
            let name = self.template.format(&image);
            if !seen.insert(name.clone()) {
                return Err(JobError::PartitionInconsistency {
                    job_id: job.id,
                    reason: format!("two uploaded files map to extracted image \"{name}\""),
                });
            }
            records.push(ImageMetadata {
                original_file,
                name,
                cycle: cycle.name.clone(),
                image,
            });
        }
        Ok(records)
    }
}

/// Place sites given by acquisition order on a near-square grid, filled
/// row by row, separately for each well.
#[must_use]
pub fn determine_grid_coordinates(images: &[RawImage]) -> Vec<(u32, u32)> {
    let mut sequences: BTreeMap<(&str, &str), BTreeSet<u32>> = BTreeMap::new();
    for image in images {
        if let SiteIndex::Sequence(n) = image.site {
            sequences
                .entry((image.plate.as_str(), image.well.as_str()))
                .or_default()
                .insert(n);
        }
    }

    images
        .iter()
        .map(|image| match image.site {
            SiteIndex::Grid { y, x } => (y, x),
            SiteIndex::Sequence(n) => {
                let (count, position) = sequences
                    .get(&(image.plate.as_str(), image.well.as_str()))
                    .map_or((1, 0), |sites| (sites.len(), sites.range(..n).count()));
                let columns = grid_columns(count);
                let (y, x) = (position / columns, position % columns);
                (
                    u32::try_from(y).unwrap_or(u32::MAX),
                    u32::try_from(x).unwrap_or(u32::MAX),
                )
            }
        })
        .collect()
}

/// Smallest column count whose square holds `sites` sites.
fn grid_columns(sites: usize) -> usize {
    let mut columns = 1;
    while columns * columns < sites {
        columns += 1;
    }
    columns
}

impl JobFamily for MetadataConverter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn create_job_descriptions(&self) -> Result<Vec<JobDescription>, JobError> {
        self.experiment
            .cycles()?
            .into_iter()
            .zip(1..)
            .map(|(cycle, id)| -> Result<JobDescription, JobError> {
                let inputs = BTreeMap::from([
                    (
                        "uploaded_image_files".to_string(),
                        storage::list_files(&cycle.image_upload_dir())?,
                    ),
                    (
                        "uploaded_additional_files".to_string(),
                        storage::list_files(&cycle.additional_upload_dir())?,
                    ),
                    (
                        "ome_xml_files".to_string(),
                        storage::list_files(&cycle.ome_xml_dir())?,
                    ),
                ]);
                let outputs =
                    BTreeMap::from([("metadata_files".to_string(), vec![cycle.metadata_file()])]);
                Ok(JobDescription {
                    id,
                    inputs,
                    outputs,
                    partition: Partition::Cycle { cycle: cycle.name },
                })
            })
            .collect()
    }

    fn run_job(&self, job: &JobDescription) -> Result<(), JobError> {
        let cycle = self.cycle(job)?;
        if job.input("uploaded_image_files").is_empty() {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: format!("cycle \"{}\" has no uploaded image files", cycle.name),
            });
        }

        let raw = self.format_image_metadata(job);
        if raw.is_empty() {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: format!(
                    "no uploaded file of cycle \"{}\" follows the {} naming convention",
                    cycle.name,
                    self.format.name()
                ),
            });
        }
        Self::log_side_files(job, &raw);

        let grid = determine_grid_coordinates(&raw);
        let (names, files): (Vec<ImageName>, Vec<PathBuf>) = raw
            .into_iter()
            .zip(grid)
            .map(|(image, (site_y, site_x))| {
                let name = ImageName {
                    plate: image.plate,
                    well: image.well,
                    site_y,
                    site_x,
                    channel: image.channel,
                };
                (name, image.file)
            })
            .unzip();
        let records = self.build_filenames_for_extracted_images(job, &cycle, names, files)?;

        let path = job.single_output("metadata_files")?;
        storage::write_json(path, &records)?;
        tracing::info!(images = records.len(), path = %path.display(), "wrote image metadata");
        Ok(())
    }
}
