use super::{Module, ModuleError, ModuleInputs, ModuleOutputs, object_pixels, require_2d};
use crate::types::{ColumnData, Label, Series};

/// Flag objects whose pixel area reaches `min_area`.
///
/// Inputs: `objects` (2D label image), `min_area` (number).
/// Outputs: `is_large` (boolean series of the same name).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifySize;

impl Module for ClassifySize {
    #[allow(clippy::cast_precision_loss)]
    fn run(&self, inputs: &ModuleInputs) -> Result<ModuleOutputs, ModuleError> {
        let labels = inputs.labels("objects")?;
        let min_area = inputs.number("min_area")?;
        require_2d("objects", labels)?;

        let pixels = object_pixels(labels);
        let index: Vec<Label> = pixels.keys().copied().collect();
        let flags = pixels.values().map(|c| c.len() as f64 >= min_area).collect();
        let series = Series::new("is_large", index, ColumnData::Bool(flags))
            .map_err(|e| ModuleError::Failed(e.to_string()))?;
        Ok(ModuleOutputs::new().with("is_large", series))
    }
}
