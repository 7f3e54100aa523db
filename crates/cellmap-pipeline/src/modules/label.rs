use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use super::{Module, ModuleError, ModuleInputs, ModuleOutputs, require_2d};
use crate::types::{Array, ArrayData, Value};

/// Connected component labelling with 8-connectivity.
///
/// Inputs: `mask` (2D binary image).
/// Outputs: `objects` (label image, labels assigned in raster order
/// starting at 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelObjects;

impl Module for LabelObjects {
    fn run(&self, inputs: &ModuleInputs) -> Result<ModuleOutputs, ModuleError> {
        let mask = inputs.mask("mask")?;
        require_2d("mask", mask)?;
        let labels = label(mask)?;
        Ok(ModuleOutputs::new().with("objects", Value::Array(ArrayData::I32(labels))))
    }
}

fn label(mask: &Array<bool>) -> Result<Array<i32>, ModuleError> {
    let too_large = |_| ModuleError::Failed("mask is too large to label".to_string());
    let width = u32::try_from(mask.width()).map_err(too_large)?;
    let height = u32::try_from(mask.height()).map_err(too_large)?;
    let pixels = mask.plane(0);
    let gray = GrayImage::from_fn(width, height, |x, y| {
        let i = y as usize * mask.width() + x as usize;
        Luma([if pixels[i] { 255 } else { 0 }])
    });

    let components = connected_components(&gray, Connectivity::Eight, Luma([0u8]));
    let data = components
        .pixels()
        .map(|p| {
            i32::try_from(p[0])
                .map_err(|_| ModuleError::Failed("too many objects for int32 labels".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Array::from_shape_vec(mask.shape().to_vec(), data)
        .map_err(|e| ModuleError::Failed(e.to_string()))
}
