//! cellmap-pipeline: typed handles and module chaining for one job (sans-IO).
//!
//! Every value a module receives or returns passes through a [`Handle`]
//! contract. Label images declared as `SegmentedObjects` become
//! [`ObjectSet`]s that accumulate per-object measurements and attributes
//! across the whole module chain and derive outline polygons in a global
//! map frame.
//!
//! This crate has **no I/O dependencies**: images arrive as in-memory
//! arrays and pipeline descriptions as already parsed structures. Reading
//! and writing files lives in `cellmap-jobs`.

pub mod contour;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod figure;
pub mod handles;
pub mod modules;
pub mod objects;
pub mod simplify;
pub mod types;

pub use descriptor::{HandleDescriptor, ModuleDescription, ModuleInterface, PipelineDescription};
pub use error::{HandleError, PipelineError};
pub use executor::{Advance, Execution, ExecutorState, Figure, Pipeline, Store};
pub use handles::{Handle, HandleKind, Kwargs, Role, create_handle, handle_types};
pub use modules::{Module, ModuleError, ModuleInputs, ModuleOutputs, ModuleRegistry};
pub use objects::{IS_BORDER, ObjectSet};
pub use types::{
    Array, ArrayData, ColumnData, Dimensions, ElementType, Frame, Label, MapPoint, Outline,
    Series, ShapeError, Value,
};
