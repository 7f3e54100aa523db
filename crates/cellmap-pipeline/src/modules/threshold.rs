use super::{Module, ModuleError, ModuleInputs, ModuleOutputs};
use crate::types::{ArrayData, Value};

/// Global threshold: pixels brighter than `threshold` become foreground.
///
/// Inputs: `image` (intensity image), `threshold` (number).
/// Outputs: `mask` (binary image of the same shape).
#[derive(Debug, Clone, Copy, Default)]
pub struct Threshold;

impl Module for Threshold {
    fn run(&self, inputs: &ModuleInputs) -> Result<ModuleOutputs, ModuleError> {
        let image = inputs.intensities("image")?;
        let threshold = inputs.number("threshold")?;
        let mask = image.map(|&v| v > threshold);
        Ok(ModuleOutputs::new().with("mask", Value::Array(ArrayData::Bool(mask))))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::Array;

    #[test]
    fn marks_pixels_above_threshold() {
        let image = Array::from_shape_vec(vec![2, 2], vec![0u16, 10, 11, 500]).unwrap();
        let mut inputs = ModuleInputs::new();
        inputs.insert("image", Value::Array(ArrayData::U16(image)));
        inputs.insert("threshold", Value::Int(10));

        let mut out = Threshold.run(&inputs).unwrap();
        let Some(Value::Array(ArrayData::Bool(mask))) = out.take("mask") else {
            panic!("expected a mask");
        };
        assert_eq!(mask.as_slice(), &[false, false, true, true]);
    }

    #[test]
    fn rejects_label_images() {
        let labels = Array::from_shape_vec(vec![1, 1], vec![1i32]).unwrap();
        let mut inputs = ModuleInputs::new();
        inputs.insert("image", Value::Array(ArrayData::I32(labels)));
        inputs.insert("threshold", Value::Int(0));
        assert!(matches!(
            Threshold.run(&inputs),
            Err(ModuleError::InputType { .. })
        ));
    }
}
