//! Error types for handle construction, value validation, and pipeline
//! execution.

use crate::modules::ModuleError;
use crate::types::Label;

/// Errors raised by the handle layer.
///
/// `UnknownType` and `InvalidArguments` are configuration errors: they
/// surface while a pipeline is being built, before any job runs. All
/// other variants are contract violations raised while a job executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// No handle type is registered under this name.
    #[error("handle type \"{type_name}\" is not a valid handle type")]
    UnknownType {
        /// The requested type name.
        type_name: String,
    },

    /// The constructor arguments are invalid for this handle type.
    #[error("invalid arguments for handle type \"{type_name}\": {reason}")]
    InvalidArguments {
        /// The handle type being constructed.
        type_name: String,
        /// What was wrong with the arguments.
        reason: String,
    },

    /// A value does not have the container or element type the handle
    /// requires.
    #[error("value for {kind} \"{handle}\" must be {expected}, got {found}")]
    TypeMismatch {
        /// Handle name.
        handle: String,
        /// Handle type name.
        kind: &'static str,
        /// Accepted type(s).
        expected: String,
        /// Type of the offending value.
        found: String,
    },

    /// A value has an unsupported number of axes.
    #[error("value for \"{handle}\" must be {expected}, got {found} dimensions")]
    Dimensionality {
        /// Handle or object set name.
        handle: String,
        /// Accepted dimensionality.
        expected: &'static str,
        /// Number of axes found.
        found: usize,
    },

    /// The row index of a measurement or attribute does not match the
    /// labels of the object set.
    #[error(
        "index of values added to objects \"{objects}\" must match its labels: {}",
        describe_index_mismatch(expected, found)
    )]
    IndexMismatch {
        /// Object set name.
        objects: String,
        /// Current labels of the object set.
        expected: Vec<Label>,
        /// Index of the rejected table or series.
        found: Vec<Label>,
    },

    /// Column names collide within an object set.
    #[error("column names added to objects \"{objects}\" must be unique: {}", columns.join(", "))]
    DuplicateColumns {
        /// Object set name.
        objects: String,
        /// Names that already exist or appear more than once.
        columns: Vec<String>,
    },

    /// An attribute series has no name.
    #[error("attribute returned for \"{handle}\" must have a non-empty name")]
    EmptyAttributeName {
        /// Handle name.
        handle: String,
    },
}

/// Say how `found` differs from `expected`: row count, order, or the
/// first differing label.
fn describe_index_mismatch(expected: &[Label], found: &[Label]) -> String {
    if expected.len() != found.len() {
        return format!("expected {} rows, got {}", expected.len(), found.len());
    }
    let Some((row, (e, f))) = expected
        .iter()
        .zip(found)
        .enumerate()
        .find(|(_, (e, f))| e != f)
    else {
        return "indexes are equal".to_string();
    };
    let mut sorted = found.to_vec();
    sorted.sort_unstable();
    if sorted == expected {
        format!("same labels in a different order, row {row} has label {f} instead of {e}")
    } else {
        format!("row {row} has label {f}, expected {e}")
    }
}

impl HandleError {
    /// Returns `true` for errors that describe an invalid handle
    /// declaration rather than an invalid value.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownType { .. } | Self::InvalidArguments { .. }
        )
    }
}

/// Errors that stop a pipeline from being built or halt a running job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A module declaration is invalid.
    #[error("module \"{module}\" is misconfigured: {source}")]
    Configuration {
        /// Module instance name.
        module: String,
        /// Underlying handle error.
        #[source]
        source: HandleError,
    },

    /// No module implementation is registered under this name.
    #[error("module \"{module}\" refers to unknown module implementation \"{name}\"")]
    UnknownModule {
        /// Module instance name.
        module: String,
        /// Implementation name.
        name: String,
    },

    /// A value violated the contract of its handle.
    #[error("module \"{module}\" violated a handle contract: {source}")]
    ContractViolation {
        /// Module instance name.
        module: String,
        /// Underlying handle error.
        #[source]
        source: HandleError,
    },

    /// A pipeline handle key was never produced upstream.
    #[error("module \"{module}\" requires \"{key}\", which no upstream module produced")]
    MissingDependency {
        /// Module instance name.
        module: String,
        /// Store key that could not be resolved.
        key: String,
    },

    /// A measurement or attribute refers to objects that do not exist.
    #[error("module \"{module}\" refers to unknown objects \"{objects_ref}\"")]
    UnknownObjects {
        /// Module instance name.
        module: String,
        /// The referenced object set key.
        objects_ref: String,
    },

    /// A declared output was not returned by the module.
    #[error("module \"{module}\" did not return declared output \"{handle}\"")]
    MissingOutput {
        /// Module instance name.
        module: String,
        /// Output handle name.
        handle: String,
    },

    /// The module function itself failed.
    #[error("module \"{module}\" failed: {source}")]
    ModuleFailed {
        /// Module instance name.
        module: String,
        /// Error reported by the module.
        #[source]
        source: ModuleError,
    },

    /// `step` was called on an execution that already finished.
    #[error("pipeline execution has already finished")]
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        let unknown = HandleError::UnknownType {
            type_name: "Blob".to_string(),
        };
        assert!(unknown.is_configuration());
        let empty = HandleError::EmptyAttributeName {
            handle: "kind".to_string(),
        };
        assert!(!empty.is_configuration());
    }

    #[test]
    fn index_mismatch_display_reports_counts() {
        let err = HandleError::IndexMismatch {
            objects: "nuclei".to_string(),
            expected: vec![1, 2, 3],
            found: vec![1, 2],
        };
        assert_eq!(
            err.to_string(),
            "index of values added to objects \"nuclei\" must match its labels: expected 3 rows, got 2"
        );
    }

    #[test]
    fn index_mismatch_display_names_reordering() {
        let err = HandleError::IndexMismatch {
            objects: "cells".to_string(),
            expected: vec![1, 2],
            found: vec![2, 1],
        };
        assert!(
            err.to_string()
                .ends_with("same labels in a different order, row 0 has label 2 instead of 1"),
            "{err}"
        );
    }

    #[test]
    fn index_mismatch_display_names_first_foreign_label() {
        let err = HandleError::IndexMismatch {
            objects: "cells".to_string(),
            expected: vec![1, 2, 3],
            found: vec![1, 5, 3],
        };
        assert!(err.to_string().ends_with("row 1 has label 5, expected 2"), "{err}");
    }

    #[test]
    fn missing_dependency_names_key() {
        let err = PipelineError::MissingDependency {
            module: "measure".to_string(),
            key: "nuclei".to_string(),
        };
        assert!(err.to_string().contains("\"nuclei\""));
    }
}
