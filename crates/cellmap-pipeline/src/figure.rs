//! SVG figures of object outlines, returned by modules through
//! `Figure` handles.
//!
//! Outlines are drawn in image coordinates (origin top-left) with one
//! `<path>` per object, cycling through a small palette so that touching
//! objects remain distinguishable.

use std::collections::BTreeMap;

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Path, Rectangle, Title};

use crate::error::HandleError;
use crate::objects::ObjectSet;
use crate::types::{Array, Label, Outline};

/// Stroke colours, cycled by label.
const PALETTE: [&str; 6] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#42d4f4",
];

/// Render the outlines of all objects in `labels` as an SVG document.
///
/// # Errors
///
/// Returns [`HandleError::Dimensionality`] for 3D label images.
pub fn outline_figure(labels: &Array<Label>, title: &str) -> Result<String, HandleError> {
    let objects = ObjectSet::new(title, labels.clone());
    let outlines = objects.outlines(0, 0, 0.0)?;
    Ok(render(&outlines, labels.width(), labels.height(), title))
}

fn render(outlines: &BTreeMap<Label, Outline>, width: usize, height: usize, title: &str) -> String {
    let mut document = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width, height))
        .add(Title::new(title))
        .add(
            Rectangle::new()
                .set("width", width)
                .set("height", height)
                .set("fill", "black"),
        );

    for (label, outline) in outlines {
        let Some(data) = path_data(outline) else {
            continue;
        };
        let color = PALETTE[label.unsigned_abs() as usize % PALETTE.len()];
        document = document.add(
            Path::new()
                .set("id", format!("object-{label}"))
                .set("fill", "none")
                .set("stroke", color)
                .set("stroke-width", 1)
                .set("d", data),
        );
    }
    document.to_string()
}

/// Path data for one outline, mapped back from the map frame
/// (`y` negated) into image coordinates.
#[allow(clippy::cast_precision_loss)]
fn path_data(outline: &Outline) -> Option<Data> {
    let (first, rest) = outline.points().split_first()?;
    let to_image = |p: &crate::types::MapPoint| (p.x as f64, -p.y as f64);
    let mut data = Data::new().move_to(to_image(first));
    for p in rest {
        data = data.line_to(to_image(p));
    }
    Some(data.close())
}
