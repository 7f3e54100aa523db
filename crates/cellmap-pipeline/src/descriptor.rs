//! Declarative pipeline and module interface descriptions.
//!
//! These are plain serde structures; parsing them from a file is left to
//! the caller. A handle descriptor keeps its constructor arguments as a
//! raw keyword map so that [`create_handle`] sees exactly what the
//! author wrote.

use serde::{Deserialize, Serialize};

use crate::error::{HandleError, PipelineError};
use crate::executor::Pipeline;
use crate::handles::{Handle, Kwargs, create_handle};
use crate::modules::ModuleRegistry;

/// One handle entry of a module interface: a type name plus its
/// constructor keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleDescriptor {
    /// Registered handle type name, e.g. `IntensityImage`.
    #[serde(rename = "type")]
    pub type_name: String,

    /// Remaining keys (`name`, `key`, `value`, ...).
    #[serde(flatten)]
    pub kwargs: Kwargs,
}

impl HandleDescriptor {
    /// Construct the handle through the factory.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`HandleError`] for unknown types or bad
    /// arguments.
    pub fn build(&self) -> Result<Handle, HandleError> {
        create_handle(&self.type_name, &self.kwargs)
    }

    /// Whether this is a `Plot` handle switched on.
    #[must_use]
    pub fn is_enabled_plot(&self) -> bool {
        self.type_name == "Plot"
            && self.kwargs.get("value") == Some(&serde_json::Value::Bool(true))
    }
}

/// Input and output handles of one module, in invocation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleInterface {
    /// Argument handles.
    #[serde(default)]
    pub input: Vec<HandleDescriptor>,
    /// Return value handles.
    #[serde(default)]
    pub output: Vec<HandleDescriptor>,
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescription {
    /// Instance name, unique within the pipeline; used in errors and
    /// figure file names.
    pub name: String,
    /// Registered module implementation.
    pub module: String,
    /// Interface descriptor.
    #[serde(default)]
    pub handles: ModuleInterface,
}

/// A complete image analysis pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescription {
    /// Channels loaded as intensity images before the first module runs;
    /// each is stored under its own name.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Modules in execution order.
    #[serde(default)]
    pub modules: Vec<ModuleDescription>,

    /// Object sets whose measurements, attributes and outlines are
    /// persisted after the run.
    #[serde(default)]
    pub objects: Vec<String>,
}

impl PipelineDescription {
    /// Build the module chain against `registry`.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`PipelineError`] for unknown modules or
    /// handle declarations the factory rejects.
    pub fn build(&self, registry: &ModuleRegistry) -> Result<Pipeline, PipelineError> {
        Pipeline::build(&self.modules, registry)
    }

    /// Whether any module is configured to produce a figure.
    #[must_use]
    pub fn plots(&self) -> bool {
        self.modules
            .iter()
            .flat_map(|m| &m.handles.input)
            .any(HandleDescriptor::is_enabled_plot)
    }
}
