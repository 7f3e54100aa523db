//! Image analysis: one job per imaging site.
//!
//! Each job loads the site's channel images, runs the configured module
//! chain, and writes a [`SiteResult`] with the measurements, attributes,
//! border flags and outlines of every persisted object set. Outlines are
//! shifted by the site's position in the well so that sites tile a common
//! map. After the batch, the collector merges the results of all
//! completed sites into one feature table and one outline document per
//! object set, plus summary statistics.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use cellmap_export::{CsvBlock, OutlineLayer, to_csv, to_feature_collection};
use cellmap_pipeline::{
    Array, ArrayData, ColumnData, Dimensions, Frame, Label, ModuleRegistry, ObjectSet, Outline,
    Pipeline, PipelineDescription, Series, Store, Value,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::description::{Batch, JobDescription, Partition};
use crate::error::JobError;
use crate::experiment::Experiment;
use crate::family::JobFamily;
use crate::filename::NameTemplate;
use crate::imextract::is_sixteen_bit;
use crate::status::BatchReport;
use crate::storage;

/// Everything persisted for one object set on one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectResult {
    pub labels: Vec<Label>,
    pub is_border: Series,
    pub measurements: Frame,
    pub attributes: Frame,
    /// Outline per label in map coordinates.
    pub outlines: BTreeMap<Label, Outline>,
}

/// Output of one image analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteResult {
    pub plate: String,
    pub well: String,
    pub site_y: u32,
    pub site_x: u32,
    pub dimensions: Dimensions,
    pub objects: BTreeMap<String, ObjectResult>,
}

impl SiteResult {
    fn context(&self) -> Vec<(&'static str, String)> {
        vec![
            ("plate", self.plate.clone()),
            ("well", self.well.clone()),
            ("site_y", self.site_y.to_string()),
            ("site_x", self.site_x.to_string()),
        ]
    }
}

/// Summary of one numeric feature over all collected objects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStatistics {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl FeatureStatistics {
    #[allow(clippy::cast_precision_loss)]
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Per object set summary written to `statistics.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStatistics {
    /// Objects over all collected sites.
    pub count: usize,
    /// Sites that contributed.
    pub sites: usize,
    pub features: BTreeMap<String, FeatureStatistics>,
}

/// The `jterator` job family.
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    experiment: Experiment,
    description: PipelineDescription,
    pipeline: Pipeline,
    template: NameTemplate,
}

impl ImageAnalysis {
    pub const NAME: &str = "jterator";

    /// Load `pipeline.yaml` and build it against the built-in modules.
    ///
    /// # Errors
    ///
    /// Returns an error if the description cannot be read, names unknown
    /// modules or handle types, or if the image name template is invalid.
    pub fn new(experiment: Experiment) -> Result<Self, JobError> {
        let description = experiment.load_pipeline()?;
        Self::with_description(experiment, description, &ModuleRegistry::builtin())
    }

    /// Build from an explicit description and module registry.
    ///
    /// # Errors
    ///
    /// See [`ImageAnalysis::new`].
    pub fn with_description(
        experiment: Experiment,
        description: PipelineDescription,
        registry: &ModuleRegistry,
    ) -> Result<Self, JobError> {
        let pipeline = description.build(registry)?;
        let template = NameTemplate::parse(&experiment.config().image_file_format)?;
        Ok(Self {
            experiment,
            description,
            pipeline,
            template,
        })
    }

    fn output_dir(&self) -> PathBuf {
        self.experiment.family_dir(Self::NAME)
    }

    /// Modules that have a `Plot` input switched on, in pipeline order.
    fn plot_modules(&self) -> Vec<&str> {
        self.description
            .modules
            .iter()
            .filter(|m| m.handles.input.iter().any(|h| h.is_enabled_plot()))
            .map(|m| m.name.as_str())
            .collect()
    }

    /// Group the extracted images of all cycles by site and channel.
    fn discover_sites(&self) -> Result<SiteImages, JobError> {
        let channels: BTreeSet<&str> = self.description.channels.iter().map(String::as_str).collect();
        let mut sites = SiteImages::new();
        for cycle in self.experiment.cycles()? {
            for file in storage::list_files(&cycle.image_dir())? {
                let Some(name) = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| self.template.parse_name(n))
                else {
                    tracing::debug!(file = %file.display(), "not an extracted image, skipping");
                    continue;
                };
                if !channels.contains(name.channel.as_str()) {
                    continue;
                }
                sites
                    .entry((name.plate, name.well, name.site_y, name.site_x))
                    .or_default()
                    .entry(name.channel)
                    .or_default()
                    .push(file);
            }
        }
        Ok(sites)
    }

    /// Load one channel image per pipeline channel into a fresh store.
    fn load_channels(&self, job: &JobDescription) -> Result<(Store, Dimensions), JobError> {
        let mut store = Store::new();
        let mut dimensions = None;
        for channel in &self.description.channels {
            let path = match job.input(channel) {
                [path] => path,
                found => {
                    return Err(JobError::PartitionInconsistency {
                        job_id: job.id,
                        reason: format!(
                            "site has {} images for channel \"{channel}\", expected 1",
                            found.len()
                        ),
                    });
                }
            };
            let (data, size) = load_image(path)?;
            if dimensions.is_some_and(|d| d != size) {
                return Err(JobError::PartitionInconsistency {
                    job_id: job.id,
                    reason: format!("channel \"{channel}\" differs in size from the other channels"),
                });
            }
            dimensions = Some(size);
            tracing::debug!(channel = %channel, width = size.width, height = size.height, "loaded channel");
            store.insert(channel.clone(), Value::Array(data));
        }
        let dimensions = dimensions.ok_or_else(|| JobError::PartitionInconsistency {
            job_id: job.id,
            reason: "pipeline declares no channels".to_string(),
        })?;
        Ok((store, dimensions))
    }

    fn object_result(
        &self,
        set: &ObjectSet,
        offset_y: i64,
        offset_x: i64,
    ) -> Result<ObjectResult, JobError> {
        Ok(ObjectResult {
            labels: set.labels().to_vec(),
            is_border: set.is_border(),
            measurements: set.measurements(),
            attributes: set.attributes(),
            outlines: set.outlines(offset_y, offset_x, self.experiment.config().outline_tolerance)?,
        })
    }
}

/// `(plate, well, site_y, site_x)`, ordered as sites are numbered.
type SiteKey = (String, String, u32, u32);

/// Image files per channel, per site.
type SiteImages = BTreeMap<SiteKey, BTreeMap<String, Vec<PathBuf>>>;

fn load_image(path: &Path) -> Result<(ArrayData, Dimensions), JobError> {
    let image = image::open(path).map_err(|source| JobError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let dimensions = Dimensions {
        width: image.width() as usize,
        height: image.height() as usize,
    };
    let shape = vec![dimensions.height, dimensions.width];
    let data = if is_sixteen_bit(&image) {
        ArrayData::U16(Array::from_shape_vec(shape, image.to_luma16().into_raw())?)
    } else if let DynamicImage::ImageLuma8(gray) = image {
        ArrayData::U8(Array::from_shape_vec(shape, gray.into_raw())?)
    } else {
        ArrayData::U8(Array::from_shape_vec(shape, image.to_luma8().into_raw())?)
    };
    Ok((data, dimensions))
}

/// Distance in map units from the origin to the site's top-left pixel.
fn site_offset(index: u32, extent: usize) -> i64 {
    i64::from(index).saturating_mul(i64::try_from(extent).unwrap_or(i64::MAX))
}

impl JobFamily for ImageAnalysis {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn create_job_descriptions(&self) -> Result<Vec<JobDescription>, JobError> {
        let results_dir = self.output_dir().join("results");
        let figures_dir = self.output_dir().join("figures");
        let plot_modules = self.plot_modules();

        Ok(self
            .discover_sites()?
            .into_iter()
            .zip(1..)
            .map(|(((plate, well, site_y, site_x), channels), id)| {
                let mut outputs = BTreeMap::from([(
                    "results".to_string(),
                    vec![results_dir.join(format!("site_{id}.json"))],
                )]);
                if !plot_modules.is_empty() {
                    outputs.insert(
                        "figures".to_string(),
                        plot_modules
                            .iter()
                            .map(|module| figures_dir.join(format!("site_{id}_{module}.svg")))
                            .collect(),
                    );
                }
                JobDescription {
                    id,
                    inputs: channels,
                    outputs,
                    partition: Partition::Site {
                        plate,
                        well,
                        site_y,
                        site_x,
                    },
                }
            })
            .collect())
    }

    fn run_job(&self, job: &JobDescription) -> Result<(), JobError> {
        let Partition::Site {
            plate,
            well,
            site_y,
            site_x,
        } = &job.partition
        else {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: "job does not describe a site".to_string(),
            });
        };

        let (store, dimensions) = self.load_channels(job)?;
        let store = self.pipeline.run(store)?;

        let plot_modules = self.plot_modules();
        let figure_paths = job.output("figures");
        if plot_modules.len() != figure_paths.len() {
            return Err(JobError::PartitionInconsistency {
                job_id: job.id,
                reason: format!(
                    "{} modules plot but the job declares {} figures",
                    plot_modules.len(),
                    figure_paths.len()
                ),
            });
        }
        for (module, path) in plot_modules.into_iter().zip(figure_paths) {
            let figure = store
                .figures()
                .iter()
                .find(|f| f.module == module)
                .ok_or_else(|| cellmap_pipeline::PipelineError::MissingOutput {
                    module: module.to_string(),
                    handle: "figure".to_string(),
                })?;
            storage::write_atomic(path, figure.markup.as_bytes())?;
        }

        let offset_y = site_offset(*site_y, dimensions.height);
        let offset_x = site_offset(*site_x, dimensions.width);
        let mut objects = BTreeMap::new();
        for name in &self.description.objects {
            let set = store.object_set(name).ok_or_else(|| {
                cellmap_pipeline::PipelineError::UnknownObjects {
                    module: Self::NAME.to_string(),
                    objects_ref: name.clone(),
                }
            })?;
            tracing::debug!(objects = %name, count = set.labels().len(), "persisting objects");
            objects.insert(name.clone(), self.object_result(set, offset_y, offset_x)?);
        }

        let result = SiteResult {
            plate: plate.clone(),
            well: well.clone(),
            site_y: *site_y,
            site_x: *site_x,
            dimensions,
            objects,
        };
        let path = job.single_output("results")?;
        storage::write_json(path, &result)?;
        tracing::info!(path = %path.display(), "wrote site result");
        Ok(())
    }

    fn has_collector(&self) -> bool {
        true
    }

    fn collect_job_output(&self, batch: &Batch, report: &BatchReport) -> Result<(), JobError> {
        report.require_terminal()?;
        let completed: BTreeSet<u32> = report.completed().into_iter().collect();

        let mut results = Vec::new();
        for job in &batch.jobs {
            if !completed.contains(&job.id) {
                tracing::warn!(id = job.id, "job did not complete, leaving it out");
                continue;
            }
            let result: SiteResult = storage::read_json(job.single_output("results")?)?;
            results.push(result);
        }

        let mut statistics = BTreeMap::new();
        for objects in &self.description.objects {
            let mut tables = Vec::new();
            for result in &results {
                if let Some(o) = result.objects.get(objects) {
                    let flags = Frame::new(o.labels.clone())
                        .with_column(o.is_border.name(), o.is_border.data().clone())?;
                    let table = Frame::concat([&o.measurements, &o.attributes, &flags]);
                    tables.push((result, o, table));
                }
            }

            let blocks: Vec<CsvBlock<'_>> = tables
                .iter()
                .map(|(result, _, table)| CsvBlock {
                    context: result.context(),
                    table,
                })
                .collect();
            let csv_path = self.output_dir().join(format!("features_{objects}.csv"));
            storage::write_atomic(&csv_path, to_csv(&blocks)?.as_bytes())?;

            let layers: Vec<OutlineLayer<'_>> = tables
                .iter()
                .map(|(result, o, _)| OutlineLayer {
                    objects,
                    properties: result
                        .context()
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), json!(v)))
                        .collect(),
                    outlines: &o.outlines,
                })
                .collect();
            let outlines_path = self.output_dir().join(format!("outlines_{objects}.geojson"));
            storage::write_json(&outlines_path, &to_feature_collection(&layers))?;

            statistics.insert(
                objects.clone(),
                object_statistics(tables.iter().map(|(_, o, _)| *o)),
            );
            tracing::info!(objects = %objects, sites = tables.len(), "collected features");
        }

        storage::write_json(&self.output_dir().join("statistics.json"), &statistics)?;
        Ok(())
    }
}

/// Object counts and per-feature summaries over the measurement columns.
#[allow(clippy::cast_precision_loss)]
fn object_statistics<'a>(results: impl Iterator<Item = &'a ObjectResult>) -> ObjectStatistics {
    let mut stats = ObjectStatistics::default();
    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for result in results {
        stats.count += result.labels.len();
        stats.sites += 1;
        for column in result.measurements.columns() {
            let entry = values.entry(column.name.as_str()).or_default();
            match &column.data {
                ColumnData::Float(v) => entry.extend(v.iter().copied().filter(|x| x.is_finite())),
                ColumnData::Int(v) => entry.extend(v.iter().map(|&x| x as f64)),
                ColumnData::Bool(_) | ColumnData::Text(_) => {}
            }
        }
    }
    stats.features = values
        .into_iter()
        .filter_map(|(name, v)| FeatureStatistics::of(&v).map(|s| (name.to_string(), s)))
        .collect();
    stats
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn statistics_use_population_std() {
        let s = FeatureStatistics::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(s.mean, 5.0);
        assert_eq!(s.std, 2.0);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
        assert_eq!(FeatureStatistics::of(&[]), None);
    }

    #[test]
    fn site_offsets_scale_with_image_size() {
        assert_eq!(site_offset(0, 512), 0);
        assert_eq!(site_offset(3, 512), 1536);
    }

    #[test]
    fn object_statistics_skip_non_numeric_columns() {
        let labels = vec![1, 2];
        let result = ObjectResult {
            labels: labels.clone(),
            is_border: Series::new("is_border", labels.clone(), ColumnData::Bool(vec![false, true]))
                .unwrap(),
            measurements: Frame::new(labels.clone())
                .with_column("area", ColumnData::Int(vec![3, 5]))
                .unwrap()
                .with_column("kind", ColumnData::Text(vec!["a".into(), "b".into()]))
                .unwrap(),
            attributes: Frame::new(labels),
            outlines: BTreeMap::new(),
        };

        let stats = object_statistics([&result, &result].into_iter());

        assert_eq!(stats.count, 4);
        assert_eq!(stats.sites, 2);
        assert_eq!(stats.features.keys().collect::<Vec<_>>(), vec!["area"]);
        assert_eq!(stats.features["area"].mean, 4.0);
    }

    #[test]
    fn site_result_with_nan_measurement_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/site_1.json");
        let labels = vec![1, 2];
        let result = SiteResult {
            plate: "P1".to_string(),
            well: "A01".to_string(),
            site_y: 0,
            site_x: 0,
            dimensions: Dimensions {
                width: 4,
                height: 4,
            },
            objects: BTreeMap::from([(
                "cells".to_string(),
                ObjectResult {
                    labels: labels.clone(),
                    is_border: Series::new(
                        "is_border",
                        labels.clone(),
                        ColumnData::Bool(vec![false, false]),
                    )
                    .unwrap(),
                    measurements: Frame::new(labels.clone())
                        .with_column("ratio", ColumnData::Float(vec![f64::NAN, 2.0]))
                        .unwrap(),
                    attributes: Frame::new(labels),
                    outlines: BTreeMap::new(),
                },
            )]),
        };

        storage::write_json(&path, &result).unwrap();
        let back: SiteResult = storage::read_json(&path).unwrap();

        let cells = &back.objects["cells"];
        let Some(ColumnData::Float(ratio)) = cells.measurements.column("ratio") else {
            panic!("ratio should be a float column");
        };
        assert!(ratio[0].is_nan());
        assert_eq!(ratio[1], 2.0);
        let stats = object_statistics(std::iter::once(cells));
        assert_eq!(stats.features["ratio"].mean, 2.0);
    }
}
