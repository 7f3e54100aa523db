use super::{Module, ModuleError, ModuleInputs, ModuleOutputs, object_pixels, require_2d};
use crate::figure::outline_figure;
use crate::types::{ColumnData, Frame, Label, Value};

/// Per-object intensity statistics.
///
/// Inputs: `objects` (2D label image), `intensity_image` (intensity
/// image of the same shape), optional `plot` flag.
/// Outputs: `measurements` with columns `Intensity_mean`,
/// `Intensity_min`, `Intensity_max`, `Intensity_sum`, `Intensity_std`;
/// `figure` (SVG outlines) when `plot` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasureIntensity;

impl Module for MeasureIntensity {
    fn run(&self, inputs: &ModuleInputs) -> Result<ModuleOutputs, ModuleError> {
        let labels = inputs.labels("objects")?;
        let image = inputs.intensities("intensity_image")?;
        require_2d("objects", labels)?;
        if labels.shape() != image.shape() {
            return Err(ModuleError::Failed(format!(
                "\"objects\" has shape {:?} but \"intensity_image\" has shape {:?}",
                labels.shape(),
                image.shape()
            )));
        }

        let pixels = object_pixels(labels);
        let index: Vec<Label> = pixels.keys().copied().collect();
        let stats: Vec<Stats> = pixels
            .values()
            .map(|coords| Stats::of(coords.iter().filter_map(|&(y, x)| image.get(y, x).copied())))
            .collect();
        let column = |f: fn(&Stats) -> f64| ColumnData::Float(stats.iter().map(f).collect());

        let table = Frame::new(index)
            .with_column("Intensity_mean", column(|s| s.mean))
            .and_then(|t| t.with_column("Intensity_min", column(|s| s.min)))
            .and_then(|t| t.with_column("Intensity_max", column(|s| s.max)))
            .and_then(|t| t.with_column("Intensity_sum", column(|s| s.sum)))
            .and_then(|t| t.with_column("Intensity_std", column(|s| s.std)))
            .map_err(|e| ModuleError::Failed(e.to_string()))?;

        let mut outputs = ModuleOutputs::new().with("measurements", table);
        if inputs.flag("plot") {
            let svg = outline_figure(labels, "objects")
                .map_err(|e| ModuleError::Failed(e.to_string()))?;
            outputs.insert("figure", Value::Str(svg));
        }
        Ok(outputs)
    }
}

#[derive(Debug, Clone, Copy)]
struct Stats {
    mean: f64,
    min: f64,
    max: f64,
    sum: f64,
    std: f64,
}

impl Stats {
    /// Population statistics of a non-empty sample.
    #[allow(clippy::cast_precision_loss)]
    fn of(values: impl Iterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.collect();
        let n = values.len().max(1) as f64;
        let sum: f64 = values.iter().sum();
        let mean = sum / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            sum,
            std: var.sqrt(),
        }
    }
}

/// Per-object size and position.
///
/// Inputs: `objects` (2D label image).
/// Outputs: `measurements` with columns `Morphology_area` (pixel count),
/// `Morphology_centroid_y` and `Morphology_centroid_x` (pixel units).
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasureMorphology;

impl Module for MeasureMorphology {
    #[allow(clippy::cast_precision_loss)]
    fn run(&self, inputs: &ModuleInputs) -> Result<ModuleOutputs, ModuleError> {
        let labels = inputs.labels("objects")?;
        require_2d("objects", labels)?;

        let pixels = object_pixels(labels);
        let index: Vec<Label> = pixels.keys().copied().collect();
        let mut area = Vec::with_capacity(index.len());
        let mut centroid_y = Vec::with_capacity(index.len());
        let mut centroid_x = Vec::with_capacity(index.len());
        for coords in pixels.values() {
            let n = coords.len() as f64;
            area.push(n);
            centroid_y.push(coords.iter().map(|&(y, _)| y as f64).sum::<f64>() / n);
            centroid_x.push(coords.iter().map(|&(_, x)| x as f64).sum::<f64>() / n);
        }

        let table = Frame::new(index)
            .with_column("Morphology_area", ColumnData::Float(area))
            .and_then(|t| t.with_column("Morphology_centroid_y", ColumnData::Float(centroid_y)))
            .and_then(|t| t.with_column("Morphology_centroid_x", ColumnData::Float(centroid_x)))
            .map_err(|e| ModuleError::Failed(e.to_string()))?;
        Ok(ModuleOutputs::new().with("measurements", table))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::types::{Array, ArrayData};

    fn labels() -> Array<i32> {
        #[rustfmt::skip]
        let data = vec![
            1, 1, 0, 0,
            1, 0, 0, 2,
            0, 0, 0, 2,
        ];
        Array::from_shape_vec(vec![3, 4], data).unwrap()
    }

    fn measurements(mut out: ModuleOutputs) -> Frame {
        match out.take("measurements") {
            Some(Value::Table(frame)) => frame,
            other => panic!("unexpected output {other:?}"),
        }
    }

    fn floats<'a>(frame: &'a Frame, column: &str) -> &'a [f64] {
        match frame.column(column) {
            Some(ColumnData::Float(v)) => v,
            other => panic!("unexpected column {other:?}"),
        }
    }

    #[test]
    fn intensity_statistics_per_object() {
        #[rustfmt::skip]
        let image = Array::from_shape_vec(vec![3, 4], vec![
            2u8, 4, 9, 9,
            6,   9, 9, 10,
            9,   9, 9, 20,
        ])
        .unwrap();
        let mut inputs = ModuleInputs::new();
        inputs.insert("objects", Value::Array(ArrayData::I32(labels())));
        inputs.insert("intensity_image", Value::Array(ArrayData::U8(image)));

        let out = MeasureIntensity.run(&inputs).unwrap();
        assert!(!out.names().any(|n| n == "figure"));
        let frame = measurements(out);
        assert_eq!(frame.index(), &[1, 2]);
        assert_eq!(floats(&frame, "Intensity_mean"), &[4.0, 15.0]);
        assert_eq!(floats(&frame, "Intensity_min"), &[2.0, 10.0]);
        assert_eq!(floats(&frame, "Intensity_max"), &[6.0, 20.0]);
        assert_eq!(floats(&frame, "Intensity_sum"), &[12.0, 30.0]);
        assert_eq!(floats(&frame, "Intensity_std")[1], 5.0);
    }

    #[test]
    fn intensity_plot_adds_figure() {
        let image = Array::from_shape_vec(vec![3, 4], vec![1u16; 12]).unwrap();
        let mut inputs = ModuleInputs::new();
        inputs.insert("objects", Value::Array(ArrayData::I32(labels())));
        inputs.insert("intensity_image", Value::Array(ArrayData::U16(image)));
        inputs.insert("plot", Value::Bool(true));

        let mut out = MeasureIntensity.run(&inputs).unwrap();
        let Some(Value::Str(svg)) = out.take("figure") else {
            panic!("expected a figure");
        };
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn intensity_rejects_shape_mismatch() {
        let image = Array::from_shape_vec(vec![2, 2], vec![1u8; 4]).unwrap();
        let mut inputs = ModuleInputs::new();
        inputs.insert("objects", Value::Array(ArrayData::I32(labels())));
        inputs.insert("intensity_image", Value::Array(ArrayData::U8(image)));
        assert!(matches!(
            MeasureIntensity.run(&inputs),
            Err(ModuleError::Failed(_))
        ));
    }

    #[test]
    fn morphology_area_and_centroid() {
        let mut inputs = ModuleInputs::new();
        inputs.insert("objects", Value::Array(ArrayData::I32(labels())));
        let frame = measurements(MeasureMorphology.run(&inputs).unwrap());
        assert_eq!(floats(&frame, "Morphology_area"), &[3.0, 2.0]);
        assert_eq!(floats(&frame, "Morphology_centroid_y"), &[1.0 / 3.0, 1.5]);
        assert_eq!(floats(&frame, "Morphology_centroid_x"), &[1.0 / 3.0, 3.0]);
    }

    #[test]
    fn empty_label_image_gives_empty_table() {
        let mut inputs = ModuleInputs::new();
        let empty = Array::from_shape_vec(vec![2, 2], vec![0; 4]).unwrap();
        inputs.insert("objects", Value::Array(ArrayData::I32(empty)));
        let frame = measurements(MeasureMorphology.run(&inputs).unwrap());
        assert_eq!(frame.n_rows(), 0);
        assert_eq!(frame.column_names().count(), 3);
    }
}
