//! Contour tracing of single-object masks.
//!
//! Uses Suzuki-Abe border following via
//! `imageproc::contours::find_contours`, which follows borders with
//! 8-connectivity. Only outer borders are returned; hole borders of
//! ring-shaped objects do not contribute to an object's outline, but an
//! island sitting inside a hole is a separate outer border.

use image::GrayImage;
use imageproc::contours::{BorderType, Contour};

use crate::types::{Point, Polyline};

/// Trace the outer borders of all foreground regions in `mask`.
///
/// Non-zero pixels are foreground. Each returned polyline lists the
/// border pixels in tracing order, in `(x = column, y = row)` image
/// coordinates relative to `mask`. Borders are returned in the order the
/// raster scan encounters them, so the first entry belongs to the
/// region with the top-most, then left-most pixel.
#[must_use]
pub fn trace_outer_contours(mask: &GrayImage) -> Vec<Polyline> {
    let contours: Vec<Contour<u32>> = imageproc::contours::find_contours(mask);

    contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(|c| {
            Polyline::new(
                c.points
                    .into_iter()
                    .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                    .collect(),
            )
        })
        .collect()
}
