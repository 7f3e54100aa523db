//! Image extraction: one job per cycle.
//!
//! Converts every uploaded image listed in a cycle's metadata file into a
//! single-plane grayscale PNG named after its site and channel. 16-bit
//! sources stay 16-bit; everything else is reduced to 8-bit luma.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::description::{JobDescription, Partition};
use crate::error::JobError;
use crate::experiment::Experiment;
use crate::family::JobFamily;
use crate::metaconvert::ImageMetadata;
use crate::storage;

/// The `imextract` job family.
#[derive(Debug, Clone)]
pub struct ImageExtractor {
    experiment: Experiment,
}

impl ImageExtractor {
    pub const NAME: &str = "imextract";

    #[must_use]
    pub const fn new(experiment: Experiment) -> Self {
        Self { experiment }
    }
}

impl JobFamily for ImageExtractor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn create_job_descriptions(&self) -> Result<Vec<JobDescription>, JobError> {
        self.experiment
            .cycles()?
            .into_iter()
            .zip(1..)
            .map(|(cycle, id)| -> Result<JobDescription, JobError> {
                let metadata_file = cycle.metadata_file();
                let records: Vec<ImageMetadata> = if metadata_file.is_file() {
                    storage::read_json(&metadata_file)?
                } else {
                    tracing::debug!(cycle = %cycle.name, "metadata not converted yet");
                    Vec::new()
                };
                let image_dir = cycle.image_dir();
                let inputs = BTreeMap::from([
                    ("metadata_files".to_string(), vec![metadata_file]),
                    (
                        "image_files".to_string(),
                        records.iter().map(|r| r.original_file.clone()).collect(),
                    ),
                ]);
                let outputs = BTreeMap::from([(
                    "extracted_images".to_string(),
                    records.iter().map(|r| image_dir.join(&r.name)).collect(),
                )]);
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
        let [metadata_file] = job.input("metadata_files") else {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: "expected exactly one metadata file".to_string(),
            });
        };
        let records: Vec<ImageMetadata> = storage::read_json(metadata_file)?;
        let targets = job.output("extracted_images");
        if records.len() != targets.len() {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: format!(
                    "metadata lists {} images but the job declares {} outputs",
                    records.len(),
                    targets.len()
                ),
            });
        }

        for (record, target) in records.iter().zip(targets) {
            if target.file_name().and_then(|n| n.to_str()) != Some(record.name.as_str()) {
                return Err(JobError::PartitionInconsistency {
                    job_id: job.id,
                    reason: format!(
                        "metadata changed since partitioning: expected \"{}\", declared {}",
                        record.name,
                        target.display()
                    ),
                });
            }
            extract(&record.original_file, target)?;
        }
        tracing::info!(images = records.len(), "extracted images");
        Ok(())
    }
}

/// Decode `source` and write it to `target` as grayscale PNG.
fn extract(source: &Path, target: &Path) -> Result<(), JobError> {
    let decode_error = |source_error| JobError::Image {
        path: source.to_path_buf(),
        source: source_error,
    };
    let image = image::open(source).map_err(decode_error)?;
    let gray = if is_sixteen_bit(&image) {
        DynamicImage::ImageLuma16(image.to_luma16())
    } else {
        DynamicImage::ImageLuma8(image.to_luma8())
    };

    let mut bytes = Vec::new();
    gray.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| JobError::Image {
            path: PathBuf::from(target),
            source: e,
        })?;
    storage::write_atomic(target, &bytes)
}

pub(crate) const fn is_sixteen_bit(image: &DynamicImage) -> bool {
    matches!(
        image,
        DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, RgbImage};

    #[test]
    fn color_images_become_eight_bit_gray() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.png");
        let target = dir.path().join("out").join("gray.png");
        RgbImage::from_pixel(3, 2, image::Rgb([200, 200, 200]))
            .save(&source)
            .unwrap();

        extract(&source, &target).unwrap();

        let back = image::open(&target).unwrap();
        assert!(matches!(back, DynamicImage::ImageLuma8(_)));
        assert_eq!((back.width(), back.height()), (3, 2));
    }

    #[test]
    fn sixteen_bit_depth_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.png");
        let target = dir.path().join("gray.png");
        let deep: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(2, 2, Luma([4000]));
        deep.save(&source).unwrap();

        extract(&source, &target).unwrap();

        let back = image::open(&target).unwrap();
        assert_eq!(back.to_luma16().get_pixel(1, 1), &Luma([4000]));
    }

    #[test]
    fn undecodable_source_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"not an image").unwrap();
        let err = extract(&source, &dir.path().join("out.png")).unwrap_err();
        assert!(matches!(err, JobError::Image { ref path, .. } if path == &source));
    }
}
