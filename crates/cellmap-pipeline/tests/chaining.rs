//! Integration test: chain modules through the shared store, both with
//! hand-written modules and with the reference modules driven by a YAML
//! description.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]

use cellmap_pipeline::{
    Array, ArrayData, ColumnData, ModuleError, ModuleInputs, ModuleOutputs, ModuleRegistry,
    PipelineDescription, PipelineError, Store, Value,
};

fn nuclei() -> Array<i32> {
    #[rustfmt::skip]
    let data = vec![
        0, 0, 0, 0, 0,
        0, 1, 1, 0, 0,
        0, 1, 1, 0, 2,
        0, 0, 0, 0, 2,
    ];
    Array::from_shape_vec(vec![4, 5], data).unwrap()
}

fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::builtin();
    registry.register(
        "segment",
        |_: &ModuleInputs| -> Result<ModuleOutputs, ModuleError> {
            Ok(ModuleOutputs::new().with("labels", Value::Array(ArrayData::I32(nuclei()))))
        },
    );
    registry.register(
        "echo",
        |inputs: &ModuleInputs| -> Result<ModuleOutputs, ModuleError> {
            let labels = inputs.labels("labels")?.clone();
            Ok(ModuleOutputs::new().with("copy", Value::Array(ArrayData::I32(labels))))
        },
    );
    registry
}

const TWO_MODULES: &str = r"
modules:
  - name: a
    module: segment
    handles:
      output:
        - { type: LabelImage, name: labels, key: nuclei }
  - name: b
    module: echo
    handles:
      input:
        - { type: LabelImage, name: labels, key: nuclei }
      output:
        - { type: LabelImage, name: copy, key: nuclei_copy }
";

#[test]
fn downstream_module_receives_upstream_array_unchanged() {
    let description: PipelineDescription = serde_yaml::from_str(TWO_MODULES).unwrap();
    let pipeline = description.build(&registry()).unwrap();

    let store = pipeline.run(Store::new()).unwrap();

    assert_eq!(
        store.get("nuclei_copy"),
        Some(&Value::Array(ArrayData::I32(nuclei())))
    );
    assert_eq!(store.get("nuclei"), store.get("nuclei_copy"));
}

#[test]
fn removing_the_producer_is_a_missing_dependency() {
    let mut description: PipelineDescription = serde_yaml::from_str(TWO_MODULES).unwrap();
    description.modules.remove(0);
    let pipeline = description.build(&registry()).unwrap();

    let err = pipeline.run(Store::new()).unwrap_err();

    match err {
        PipelineError::MissingDependency { module, key } => {
            assert_eq!(module, "b");
            assert_eq!(key, "nuclei");
        }
        other => panic!("expected a missing dependency, got {other}"),
    }
}

#[test]
fn unknown_handle_type_fails_before_running() {
    let yaml = r"
modules:
  - name: a
    module: segment
    handles:
      output:
        - { type: Blob, name: labels, key: nuclei }
";
    let description: PipelineDescription = serde_yaml::from_str(yaml).unwrap();
    let err = description.build(&registry()).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { ref module, .. } if module == "a"));
    assert!(err.to_string().contains("\"Blob\""));
}

#[test]
fn unknown_module_fails_before_running() {
    let yaml = r"
modules:
  - name: a
    module: watershed
";
    let description: PipelineDescription = serde_yaml::from_str(yaml).unwrap();
    assert!(matches!(
        description.build(&registry()),
        Err(PipelineError::UnknownModule { name, .. }) if name == "watershed"
    ));
}

const REFERENCE_PIPELINE: &str = r"
channels: [dapi]
modules:
  - name: threshold
    module: threshold
    handles:
      input:
        - { type: IntensityImage, name: image, key: dapi }
        - { type: Scalar, name: threshold, value: 100 }
      output:
        - { type: BinaryImage, name: mask, key: nuclei_mask }
  - name: label
    module: label
    handles:
      input:
        - { type: BinaryImage, name: mask, key: nuclei_mask }
      output:
        - { type: SegmentedObjects, name: objects, key: nuclei }
  - name: intensity
    module: measure_intensity
    handles:
      input:
        - { type: SegmentedObjects, name: objects, key: nuclei }
        - { type: IntensityImage, name: intensity_image, key: dapi }
        - { type: Plot, name: plot, value: true }
      output:
        - { type: Measurement, name: measurements, objects_ref: nuclei, channel_ref: dapi }
        - { type: Figure, name: figure }
  - name: morphology
    module: measure_morphology
    handles:
      input:
        - { type: SegmentedObjects, name: objects, key: nuclei }
      output:
        - { type: Measurement, name: measurements, objects_ref: nuclei }
  - name: size
    module: classify_size
    handles:
      input:
        - { type: SegmentedObjects, name: objects, key: nuclei }
        - { type: Scalar, name: min_area, value: 8 }
      output:
        - { type: Attribute, name: is_large, objects_ref: nuclei }
objects: [nuclei]
";

/// A 10x10 field with a 3x3 blob at (2..5, 2..5) and a 2x3 blob at
/// (6..8, 6..9).
fn dapi() -> Array<u8> {
    let mut data = vec![10u8; 100];
    for y in 2..5 {
        for x in 2..5 {
            data[y * 10 + x] = 200;
        }
    }
    for y in 6..8 {
        for x in 6..9 {
            data[y * 10 + x] = 150;
        }
    }
    Array::from_shape_vec(vec![10, 10], data).unwrap()
}

fn floats(values: Option<&ColumnData>) -> Vec<f64> {
    match values {
        Some(ColumnData::Float(v)) => v.clone(),
        other => panic!("expected float column, got {other:?}"),
    }
}

#[test]
fn reference_modules_accumulate_features() {
    let description: PipelineDescription = serde_yaml::from_str(REFERENCE_PIPELINE).unwrap();
    assert!(description.plots());
    let pipeline = description.build(&ModuleRegistry::builtin()).unwrap();

    let mut store = Store::new();
    store.insert("dapi", Value::Array(ArrayData::U8(dapi())));
    let store = pipeline.run(store).unwrap();

    let nuclei = store.object_set("nuclei").expect("object set stored");
    assert_eq!(nuclei.labels(), &[1, 2]);

    let measurements = nuclei.measurements();
    assert_eq!(
        measurements.column_names().collect::<Vec<_>>(),
        vec![
            "Intensity_mean_dapi",
            "Intensity_min_dapi",
            "Intensity_max_dapi",
            "Intensity_sum_dapi",
            "Intensity_std_dapi",
            "Morphology_area",
            "Morphology_centroid_y",
            "Morphology_centroid_x",
        ]
    );
    assert_eq!(floats(measurements.column("Intensity_mean_dapi")), vec![200.0, 150.0]);
    assert_eq!(floats(measurements.column("Morphology_area")), vec![9.0, 6.0]);
    assert_eq!(floats(measurements.column("Morphology_centroid_y")), vec![3.0, 6.5]);

    let attributes = nuclei.attributes();
    assert_eq!(
        attributes.column("is_large"),
        Some(&ColumnData::Bool(vec![true, false]))
    );

    assert_eq!(store.figures().len(), 1);
    assert_eq!(store.figures()[0].module, "intensity");

    let outlines = nuclei.outlines(0, 0, 1.0).unwrap();
    assert_eq!(outlines.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert!(outlines.values().all(|o| o.points().first() == o.points().last()));
}

#[test]
fn wrong_channel_type_is_a_contract_violation() {
    let description: PipelineDescription = serde_yaml::from_str(REFERENCE_PIPELINE).unwrap();
    let pipeline = description.build(&ModuleRegistry::builtin()).unwrap();

    let mut store = Store::new();
    let labels = Array::from_shape_vec(vec![2, 2], vec![0i32; 4]).unwrap();
    store.insert("dapi", Value::Array(ArrayData::I32(labels)));

    let err = pipeline.run(store).unwrap_err();
    assert!(matches!(err, PipelineError::ContractViolation { ref module, .. } if module == "threshold"));
    assert!(err.to_string().contains("\"image\""));
}
