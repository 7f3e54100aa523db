//! `GeoJSON` export of object outlines.
//!
//! Each outline becomes a `Feature` with a single-ring `Polygon` geometry
//! in map coordinates (`[x, y]` pairs, `y` growing upwards). Layers share
//! one `FeatureCollection`, so outlines of all sites of an experiment can
//! be viewed together.

use std::collections::BTreeMap;

use cellmap_pipeline::{Label, Outline};
use serde_json::{Map, Value, json};

/// Outlines of one object set on one site, with shared properties.
#[derive(Debug, Clone)]
pub struct OutlineLayer<'a> {
    /// Object set name, stored as the `objects` property.
    pub objects: &'a str,
    /// Properties copied onto every feature of the layer (plate, well,
    /// site position, ...).
    pub properties: Map<String, Value>,
    /// Outline per label.
    pub outlines: &'a BTreeMap<Label, Outline>,
}

/// Build a `FeatureCollection` from all layers, in layer then label order.
#[must_use]
pub fn to_feature_collection(layers: &[OutlineLayer<'_>]) -> Value {
    let features: Vec<Value> = layers
        .iter()
        .flat_map(|layer| {
            layer.outlines.iter().map(move |(label, outline)| {
                let mut properties = layer.properties.clone();
                properties.insert("objects".to_string(), json!(layer.objects));
                properties.insert("label".to_string(), json!(label));
                json!({
                    "type": "Feature",
                    "geometry": polygon(outline),
                    "properties": properties,
                })
            })
        })
        .collect();
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

fn polygon(outline: &Outline) -> Value {
    let ring: Vec<[i64; 2]> = outline.points().iter().map(|p| [p.x, p.y]).collect();
    json!({
        "type": "Polygon",
        "coordinates": [ring],
    })
}
