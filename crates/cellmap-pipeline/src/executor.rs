//! Sequential module chaining over a job-scoped store.
//!
//! A [`Pipeline`] is built once from module descriptions: every handle is
//! constructed through the factory and every module name resolved
//! against a [`ModuleRegistry`], so configuration errors surface before
//! any job runs. Running a pipeline threads a [`Store`] through the
//! modules in declared order.
//!
//! Execution is an explicit state machine:
//!
//! ```text
//! Init -> Running(0) -> Running(1) -> ... -> Done
//!             \             \
//!              +-> Failed    +-> Failed
//! ```
//!
//! [`Execution::step`] advances by one module; [`Pipeline::run`] loops
//! until the chain completes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::descriptor::ModuleDescription;
use crate::error::{HandleError, PipelineError};
use crate::handles::{Handle, HandleKind, Role};
use crate::modules::{Module, ModuleInputs, ModuleRegistry};
use crate::objects::ObjectSet;
use crate::types::{ArrayData, Value};

/// A figure returned by a module through a `Figure` handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Figure {
    /// Module instance that produced the figure.
    pub module: String,
    /// Output handle name.
    pub handle: String,
    /// Figure markup.
    pub markup: String,
}

/// The job-scoped key-value context threaded through a pipeline run.
///
/// Holds pipeline handle values by key, the object sets created by
/// `SegmentedObjects` outputs, and any figures. Created empty per job and
/// never shared between jobs.
#[derive(Debug, Clone, Default)]
pub struct Store {
    values: HashMap<String, Value>,
    objects: BTreeMap<String, ObjectSet>,
    figures: Vec<Figure>,
}

impl Store {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value, e.g. a channel image loaded by the job runner.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Object set stored under `key`.
    #[must_use]
    pub fn object_set(&self, key: &str) -> Option<&ObjectSet> {
        self.objects.get(key)
    }

    /// All object sets, sorted by key.
    pub fn object_sets(&self) -> impl Iterator<Item = &ObjectSet> {
        self.objects.values()
    }

    /// Figures in the order they were produced.
    #[must_use]
    pub fn figures(&self) -> &[Figure] {
        &self.figures
    }

    /// Take the object sets out of the store.
    #[must_use]
    pub fn into_object_sets(self) -> BTreeMap<String, ObjectSet> {
        self.objects
    }
}

/// One module of a built pipeline with its constructed handles.
#[derive(Clone)]
pub struct Step {
    name: String,
    module: Arc<dyn Module>,
    inputs: Vec<Handle>,
    outputs: Vec<Handle>,
}

impl Step {
    /// Module instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input handles in invocation order.
    #[must_use]
    pub fn inputs(&self) -> &[Handle] {
        &self.inputs
    }

    /// Output handles in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &[Handle] {
        &self.outputs
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// A validated, ready-to-run module chain.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    /// Build a pipeline, constructing every handle up front.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownModule`] for unregistered module
    /// implementations and [`PipelineError::Configuration`] for invalid
    /// handle declarations, including handles used in a role their kind
    /// does not allow (e.g. a `Measurement` input).
    pub fn build(
        modules: &[ModuleDescription],
        registry: &ModuleRegistry,
    ) -> Result<Self, PipelineError> {
        let steps = modules
            .iter()
            .map(|description| -> Result<Step, PipelineError> {
                let module =
                    registry
                        .get(&description.module)
                        .ok_or_else(|| PipelineError::UnknownModule {
                            module: description.name.clone(),
                            name: description.module.clone(),
                        })?;
                let build = |descriptors: &[crate::descriptor::HandleDescriptor], role| {
                    descriptors
                        .iter()
                        .map(|d| {
                            d.build()
                                .and_then(|h| check_role(h, role))
                                .map_err(|source| PipelineError::Configuration {
                                    module: description.name.clone(),
                                    source,
                                })
                        })
                        .collect::<Result<Vec<_>, _>>()
                };
                Ok(Step {
                    name: description.name.clone(),
                    module,
                    inputs: build(&description.handles.input, Role::Input)?,
                    outputs: build(&description.handles.output, Role::Output)?,
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        Ok(Self { steps })
    }

    /// Append a module with already constructed handles.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if a handle is used in a
    /// role its kind does not allow.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        module: impl Module + 'static,
        inputs: Vec<Handle>,
        outputs: Vec<Handle>,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        let checked = |handles: Vec<Handle>, role| {
            handles
                .into_iter()
                .map(|h| check_role(h, role))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| PipelineError::Configuration {
                    module: name.clone(),
                    source,
                })
        };
        let inputs = checked(inputs, Role::Input)?;
        let outputs = checked(outputs, Role::Output)?;
        self.steps.push(Step {
            name,
            module: Arc::new(module),
            inputs,
            outputs,
        });
        Ok(())
    }

    /// The modules in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Start an execution over `store`.
    #[must_use]
    pub const fn start(&self, store: Store) -> Execution<'_> {
        Execution {
            pipeline: self,
            store,
            state: ExecutorState::Init,
        }
    }

    /// Run every module in order and return the final store.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError`] raised by any module.
    pub fn run(&self, store: Store) -> Result<Store, PipelineError> {
        let mut execution = self.start(store);
        while let Advance::Ran(_) = execution.step()? {}
        Ok(execution.into_store())
    }
}

fn check_role(handle: Handle, role: Role) -> Result<Handle, HandleError> {
    if handle.kind().allows(role) {
        Ok(handle)
    } else {
        let role = match role {
            Role::Input => "an input",
            Role::Output => "an output",
        };
        Err(HandleError::InvalidArguments {
            type_name: handle.kind().type_name().to_string(),
            reason: format!("handle \"{}\" cannot be used as {role}", handle.name()),
        })
    }
}

/// Where an [`Execution`] is in the module chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorState {
    /// No module has run yet.
    Init,
    /// Module `index` was the last to run successfully.
    Running {
        /// Position in the chain.
        index: usize,
        /// Module instance name.
        module: String,
    },
    /// All modules ran.
    Done,
    /// A module failed; the store must not be persisted.
    Failed {
        /// Module instance name.
        module: String,
    },
}

/// Result of [`Execution::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Advance {
    /// The named module ran.
    Ran(String),
    /// No modules remain; the execution is now [`ExecutorState::Done`].
    Complete,
}

/// A pipeline run in progress.
#[derive(Debug)]
pub struct Execution<'p> {
    pipeline: &'p Pipeline,
    store: Store,
    state: ExecutorState,
}

impl Execution<'_> {
    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ExecutorState {
        &self.state
    }

    /// The store as it stands after the last successful module.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Consume the execution and return its store.
    #[must_use]
    pub fn into_store(self) -> Store {
        self.store
    }

    /// Run the next module.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Finished`] if the execution is already
    /// `Done` or `Failed`; otherwise any error raised while resolving
    /// inputs, invoking the module, or storing its outputs, after which
    /// the state is `Failed`.
    pub fn step(&mut self) -> Result<Advance, PipelineError> {
        let index = match &self.state {
            ExecutorState::Init => 0,
            ExecutorState::Running { index, .. } => index + 1,
            ExecutorState::Done | ExecutorState::Failed { .. } => {
                return Err(PipelineError::Finished);
            }
        };
        let Some(step) = self.pipeline.steps.get(index) else {
            self.state = ExecutorState::Done;
            return Ok(Advance::Complete);
        };

        tracing::debug!(module = %step.name, index, "running module");
        match run_step(step, &mut self.store) {
            Ok(()) => {
                self.state = ExecutorState::Running {
                    index,
                    module: step.name.clone(),
                };
                Ok(Advance::Ran(step.name.clone()))
            }
            Err(e) => {
                self.state = ExecutorState::Failed {
                    module: step.name.clone(),
                };
                Err(e)
            }
        }
    }
}

fn run_step(step: &Step, store: &mut Store) -> Result<(), PipelineError> {
    let module = step.name.as_str();
    let violation = |source: HandleError| PipelineError::ContractViolation {
        module: module.to_string(),
        source,
    };

    let mut inputs = ModuleInputs::new();
    for handle in &step.inputs {
        let value = match (handle.literal(), handle.key()) {
            (Some(value), _) => value,
            (None, Some(key)) => store
                .values
                .get(key)
                .cloned()
                .ok_or_else(|| PipelineError::MissingDependency {
                    module: module.to_string(),
                    key: key.to_string(),
                })?,
            (None, None) => continue,
        };
        inputs.insert(handle.name(), handle.validate(value).map_err(violation)?);
    }

    let mut returned = step
        .module
        .run(&inputs)
        .map_err(|source| PipelineError::ModuleFailed {
            module: module.to_string(),
            source,
        })?;

    let mut validated = Vec::with_capacity(step.outputs.len());
    for handle in &step.outputs {
        match returned.take(handle.name()) {
            Some(value) => validated.push((handle, handle.validate(value).map_err(violation)?)),
            None if matches!(handle.kind(), HandleKind::Figure) => {}
            None => {
                return Err(PipelineError::MissingOutput {
                    module: module.to_string(),
                    handle: handle.name().to_string(),
                });
            }
        }
    }

    // Outputs of one module are committed together or not at all.
    let mut staged = Staged::default();
    for (handle, value) in validated {
        staged.add(module, handle, value, store)?;
    }
    staged.commit(store);
    Ok(())
}

/// Outputs of one module, held back until all of them are accepted.
///
/// Object sets touched by a measurement or attribute are copied out of
/// the store and updated here.
#[derive(Default)]
struct Staged {
    values: Vec<(String, Value)>,
    objects: BTreeMap<String, ObjectSet>,
    figures: Vec<Figure>,
}

impl Staged {
    fn add(
        &mut self,
        module: &str,
        handle: &Handle,
        value: Value,
        store: &Store,
    ) -> Result<(), PipelineError> {
        let violation = |source: HandleError| PipelineError::ContractViolation {
            module: module.to_string(),
            source,
        };
        match (handle.kind(), value) {
            (HandleKind::SegmentedObjects { key }, Value::Array(ArrayData::I32(labels))) => {
                let set = ObjectSet::new(key.clone(), labels.clone());
                tracing::debug!(objects = %key, count = set.labels().len(), "created object set");
                self.objects.insert(key.clone(), set);
                self.values
                    .push((key.clone(), Value::Array(ArrayData::I32(labels))));
            }
            (
                HandleKind::Measurement {
                    objects_ref,
                    channel_ref,
                },
                Value::Table(table),
            ) => {
                let table = match channel_ref {
                    Some(channel) => table.rename_columns(|c| format!("{c}_{channel}")),
                    None => table,
                };
                self.object_set_mut(store, module, objects_ref)?
                    .add_measurement(table)
                    .map_err(violation)?;
            }
            (HandleKind::Attribute { objects_ref }, Value::Series(series)) => {
                self.object_set_mut(store, module, objects_ref)?
                    .add_attribute(series)
                    .map_err(violation)?;
            }
            (HandleKind::Figure, Value::Str(markup)) => self.figures.push(Figure {
                module: module.to_string(),
                handle: handle.name().to_string(),
                markup,
            }),
            (kind, value) => {
                if let Some(key) = kind.key() {
                    self.values.push((key.to_string(), value));
                }
            }
        }
        Ok(())
    }

    fn object_set_mut(
        &mut self,
        store: &Store,
        module: &str,
        objects_ref: &str,
    ) -> Result<&mut ObjectSet, PipelineError> {
        if !self.objects.contains_key(objects_ref) {
            let set = store
                .objects
                .get(objects_ref)
                .ok_or_else(|| PipelineError::UnknownObjects {
                    module: module.to_string(),
                    objects_ref: objects_ref.to_string(),
                })?;
            self.objects.insert(objects_ref.to_string(), set.clone());
        }
        self.objects
            .get_mut(objects_ref)
            .ok_or_else(|| PipelineError::UnknownObjects {
                module: module.to_string(),
                objects_ref: objects_ref.to_string(),
            })
    }

    fn commit(self, store: &mut Store) {
        store.values.extend(self.values);
        store.objects.extend(self.objects);
        store.figures.extend(self.figures);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::modules::{ModuleError, ModuleOutputs};
    use crate::types::{Array, ColumnData, Frame};

    fn labels() -> Array<i32> {
        Array::from_shape_vec(vec![2, 3], vec![1, 0, 2, 1, 0, 2]).unwrap()
    }

    fn handle(kind: HandleKind, name: &str) -> Handle {
        Handle::new(name, "", kind)
    }

    fn objects_handle(name: &str, key: &str) -> Handle {
        handle(
            HandleKind::SegmentedObjects {
                key: key.to_string(),
            },
            name,
        )
    }

    type Outcome = Result<ModuleOutputs, ModuleError>;

    fn segmenter(_: &ModuleInputs) -> Outcome {
        Ok(ModuleOutputs::new().with("objects", Value::Array(ArrayData::I32(labels()))))
    }

    #[test]
    fn empty_pipeline_completes_immediately() {
        let pipeline = Pipeline::default();
        let mut execution = pipeline.start(Store::new());
        assert_eq!(execution.step().unwrap(), Advance::Complete);
        assert_eq!(execution.state(), &ExecutorState::Done);
        assert!(matches!(execution.step(), Err(PipelineError::Finished)));
    }

    #[test]
    fn states_follow_the_chain() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push("segment", segmenter, vec![], vec![objects_handle("objects", "cells")])
            .unwrap();
        let mut execution = pipeline.start(Store::new());
        assert_eq!(execution.state(), &ExecutorState::Init);
        assert_eq!(execution.step().unwrap(), Advance::Ran("segment".into()));
        assert_eq!(
            execution.state(),
            &ExecutorState::Running {
                index: 0,
                module: "segment".into()
            }
        );
        assert_eq!(execution.step().unwrap(), Advance::Complete);
        let store = execution.into_store();
        assert_eq!(store.object_set("cells").unwrap().labels(), &[1, 2]);
    }

    #[test]
    fn measurements_are_suffixed_with_channel() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push("segment", segmenter, vec![], vec![objects_handle("objects", "cells")])
            .unwrap();
        pipeline
            .push(
                "measure",
                |_: &ModuleInputs| -> Outcome {
                    let table = Frame::new(vec![1, 2])
                        .with_column("Intensity_mean", ColumnData::Float(vec![1.0, 2.0]))
                        .unwrap();
                    Ok(ModuleOutputs::new().with("measurements", table))
                },
                vec![objects_handle("objects", "cells")],
                vec![handle(
                    HandleKind::Measurement {
                        objects_ref: "cells".into(),
                        channel_ref: Some("dapi".into()),
                    },
                    "measurements",
                )],
            )
            .unwrap();

        let store = pipeline.run(Store::new()).unwrap();
        let table = store.object_set("cells").unwrap().measurements();
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["Intensity_mean_dapi"]
        );
    }

    #[test]
    fn invalid_output_fails_the_job() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push(
                "broken",
                |_: &ModuleInputs| -> Outcome { Ok(ModuleOutputs::new().with("objects", Value::Int(3))) },
                vec![],
                vec![objects_handle("objects", "cells")],
            )
            .unwrap();
        let mut execution = pipeline.start(Store::new());
        let err = execution.step().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ContractViolation {
                source: HandleError::TypeMismatch { .. },
                ..
            }
        ));
        assert_eq!(
            execution.state(),
            &ExecutorState::Failed {
                module: "broken".into()
            }
        );
        assert!(execution.store().object_set("cells").is_none());
    }

    #[test]
    fn rejected_output_discards_earlier_outputs_of_the_module() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push("segment", segmenter, vec![], vec![objects_handle("objects", "cells")])
            .unwrap();
        let measurement = |name: &str| {
            handle(
                HandleKind::Measurement {
                    objects_ref: "cells".into(),
                    channel_ref: None,
                },
                name,
            )
        };
        pipeline
            .push(
                "measure",
                |_: &ModuleInputs| -> Outcome {
                    let good = Frame::new(vec![1, 2])
                        .with_column("a", ColumnData::Float(vec![1.0, 2.0]))
                        .unwrap();
                    let reordered = Frame::new(vec![2, 1])
                        .with_column("b", ColumnData::Float(vec![3.0, 4.0]))
                        .unwrap();
                    Ok(ModuleOutputs::new().with("a", good).with("b", reordered))
                },
                vec![],
                vec![measurement("a"), measurement("b")],
            )
            .unwrap();

        let mut execution = pipeline.start(Store::new());
        execution.step().unwrap();
        let err = execution.step().unwrap_err();

        assert!(matches!(
            err,
            PipelineError::ContractViolation {
                source: HandleError::IndexMismatch { .. },
                ..
            }
        ));
        let cells = execution.store().object_set("cells").unwrap();
        assert!(cells.measurements().is_empty());
    }

    #[test]
    fn measurement_for_unknown_objects_is_rejected() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push(
                "measure",
                |_: &ModuleInputs| -> Outcome {
                    Ok(ModuleOutputs::new().with("m", Frame::new(vec![])))
                },
                vec![],
                vec![handle(
                    HandleKind::Measurement {
                        objects_ref: "ghosts".into(),
                        channel_ref: None,
                    },
                    "m",
                )],
            )
            .unwrap();
        assert!(matches!(
            pipeline.run(Store::new()),
            Err(PipelineError::UnknownObjects { objects_ref, .. }) if objects_ref == "ghosts"
        ));
    }

    #[test]
    fn missing_declared_output_is_reported() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push(
                "silent",
                |_: &ModuleInputs| -> Outcome { Ok(ModuleOutputs::new()) },
                vec![],
                vec![objects_handle("objects", "cells")],
            )
            .unwrap();
        assert!(matches!(
            pipeline.run(Store::new()),
            Err(PipelineError::MissingOutput { handle, .. }) if handle == "objects"
        ));
    }

    #[test]
    fn absent_figure_is_not_an_error() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push(
                "quiet",
                |_: &ModuleInputs| -> Outcome { Ok(ModuleOutputs::new()) },
                vec![handle(HandleKind::Plot { value: false }, "plot")],
                vec![handle(HandleKind::Figure, "figure")],
            )
            .unwrap();
        let store = pipeline.run(Store::new()).unwrap();
        assert!(store.figures().is_empty());
    }

    #[test]
    fn output_only_handles_cannot_be_inputs() {
        let mut pipeline = Pipeline::default();
        let err = pipeline
            .push(
                "bad",
                |_: &ModuleInputs| -> Outcome { Ok(ModuleOutputs::new()) },
                vec![handle(HandleKind::Figure, "figure")],
                vec![],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration {
                source: HandleError::InvalidArguments { .. },
                ..
            }
        ));
    }

    #[test]
    fn module_errors_are_wrapped() {
        let mut pipeline = Pipeline::default();
        pipeline
            .push(
                "explode",
                |_: &ModuleInputs| -> Outcome { Err(ModuleError::Failed("boom".into())) },
                vec![],
                vec![],
            )
            .unwrap();
        let err = pipeline.run(Store::new()).unwrap_err();
        assert_eq!(err.to_string(), "module \"explode\" failed: boom");
    }
}
