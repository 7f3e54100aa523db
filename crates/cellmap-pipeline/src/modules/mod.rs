//! Module functions and the registry that resolves them by name.
//!
//! The executor treats modules as opaque: a module receives the values
//! bound to its input handles and returns values keyed by output handle
//! name. Everything it returns is validated by the handle layer before
//! it reaches the job store.
//!
//! A handful of reference modules ship with the crate so that complete
//! pipelines can run without external plugins.

mod classify;
mod label;
mod measure;
mod threshold;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{Array, ArrayData, Value};

pub use classify::ClassifySize;
pub use label::LabelObjects;
pub use measure::{MeasureIntensity, MeasureMorphology};
pub use threshold::Threshold;

/// Errors reported by a module function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    /// An argument the module needs was not bound.
    #[error("missing input \"{0}\"")]
    MissingInput(String),

    /// An argument has a type the module cannot work with.
    #[error("input \"{name}\" must be {expected}, got {found}")]
    InputType {
        /// Argument name.
        name: String,
        /// What the module expected.
        expected: &'static str,
        /// What it received.
        found: String,
    },

    /// The computation itself failed.
    #[error("{0}")]
    Failed(String),
}

/// Arguments of one module invocation, keyed by input handle name.
#[derive(Debug, Clone, Default)]
pub struct ModuleInputs {
    values: BTreeMap<String, Value>,
}

impl ModuleInputs {
    /// Create an empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value to an argument name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// The raw value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The value bound to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::MissingInput`] if nothing is bound.
    pub fn value(&self, name: &str) -> Result<&Value, ModuleError> {
        self.get(name)
            .ok_or_else(|| ModuleError::MissingInput(name.to_string()))
    }

    /// An intensity image widened to `f64`.
    ///
    /// # Errors
    ///
    /// Fails if `name` is unbound or not an 8/16-bit array.
    pub fn intensities(&self, name: &str) -> Result<Array<f64>, ModuleError> {
        let value = self.value(name)?;
        match value {
            Value::Array(a) => a
                .intensities()
                .ok_or_else(|| type_error(name, "an intensity image", value)),
            other => Err(type_error(name, "an intensity image", other)),
        }
    }

    /// A label image.
    ///
    /// # Errors
    ///
    /// Fails if `name` is unbound or not an `int32` array.
    pub fn labels(&self, name: &str) -> Result<&Array<i32>, ModuleError> {
        match self.value(name)? {
            Value::Array(ArrayData::I32(a)) => Ok(a),
            other => Err(type_error(name, "a label image", other)),
        }
    }

    /// A binary mask.
    ///
    /// # Errors
    ///
    /// Fails if `name` is unbound or not a `bool` array.
    pub fn mask(&self, name: &str) -> Result<&Array<bool>, ModuleError> {
        match self.value(name)? {
            Value::Array(ArrayData::Bool(a)) => Ok(a),
            other => Err(type_error(name, "a binary image", other)),
        }
    }

    /// A numeric scalar; integers are widened.
    ///
    /// # Errors
    ///
    /// Fails if `name` is unbound or not a number.
    #[allow(clippy::cast_precision_loss)]
    pub fn number(&self, name: &str) -> Result<f64, ModuleError> {
        match self.value(name)? {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(type_error(name, "a number", other)),
        }
    }

    /// A string scalar.
    ///
    /// # Errors
    ///
    /// Fails if `name` is unbound or not a string.
    pub fn string(&self, name: &str) -> Result<&str, ModuleError> {
        match self.value(name)? {
            Value::Str(s) => Ok(s),
            other => Err(type_error(name, "a string", other)),
        }
    }

    /// A boolean flag, `false` when unbound.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Value::Bool(true)))
    }
}

fn type_error(name: &str, expected: &'static str, found: &Value) -> ModuleError {
    ModuleError::InputType {
        name: name.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// Values returned by one module invocation, keyed by output handle name.
#[derive(Debug, Clone, Default)]
pub struct ModuleOutputs {
    values: BTreeMap<String, Value>,
}

impl ModuleOutputs {
    /// Create an empty result set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Add a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Remove and return the value for `name`.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Names of all returned values.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// A pipeline module: an opaque function from bound inputs to outputs.
pub trait Module: Send + Sync {
    /// Run the module once.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError`] if the inputs are unusable or the
    /// computation fails.
    fn run(&self, inputs: &ModuleInputs) -> Result<ModuleOutputs, ModuleError>;
}

impl<F> Module for F
where
    F: Fn(&ModuleInputs) -> Result<ModuleOutputs, ModuleError> + Send + Sync,
{
    fn run(&self, inputs: &ModuleInputs) -> Result<ModuleOutputs, ModuleError> {
        self(inputs)
    }
}

/// Name to implementation mapping used when building pipelines.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the reference modules: `threshold`, `label`,
    /// `measure_intensity`, `measure_morphology`, and `classify_size`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("threshold", Threshold);
        registry.register("label", LabelObjects);
        registry.register("measure_intensity", MeasureIntensity);
        registry.register("measure_morphology", MeasureMorphology);
        registry.register("classify_size", ClassifySize);
        registry
    }

    /// Register a module under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, module: impl Module + 'static) {
        self.modules.insert(name.into(), Arc::new(module));
    }

    /// Look up a module by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Registered module names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.modules.keys()).finish()
    }
}

/// Per-object pixel statistics over the first plane of a label image.
///
/// Returns one entry per label in ascending label order, holding the
/// pixel coordinates `(row, column)` of that object.
pub(crate) fn object_pixels(labels: &Array<i32>) -> BTreeMap<i32, Vec<(usize, usize)>> {
    let w = labels.width();
    let mut pixels: BTreeMap<i32, Vec<(usize, usize)>> = BTreeMap::new();
    for (i, &label) in labels.plane(0).iter().enumerate() {
        if label > 0 {
            pixels.entry(label).or_default().push((i / w, i % w));
        }
    }
    pixels
}

/// Fail unless the array is two-dimensional.
pub(crate) fn require_2d<T>(name: &str, array: &Array<T>) -> Result<(), ModuleError> {
    if array.ndim() == 2 {
        Ok(())
    } else {
        Err(ModuleError::Failed(format!(
            "\"{name}\" must be a 2D image, got {} dimensions",
            array.ndim()
        )))
    }
}
