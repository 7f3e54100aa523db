//! Segmented object sets and their accumulated per-object data.
//!
//! An [`ObjectSet`] is created when a module returns a `SegmentedObjects`
//! value and lives for the rest of the job: later modules append
//! measurements and attributes to it. Appends are validated before
//! anything is stored, so a rejected append leaves the set untouched.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use image::GrayImage;

use crate::contour::trace_outer_contours;
use crate::error::HandleError;
use crate::simplify::approximate_polygon;
use crate::types::{Array, Column, ColumnData, Frame, Label, MapPoint, Outline, Polyline, Series};

/// Name of the border flag column; measurements and attributes may not
/// use it.
pub const IS_BORDER: &str = "is_border";

/// A label image plus everything measured for its objects so far.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSet {
    name: String,
    image: Array<Label>,
    labels: Vec<Label>,
    measurements: Vec<Frame>,
    attributes: Vec<Series>,
}

impl ObjectSet {
    /// Create an object set with no measurements or attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, image: Array<Label>) -> Self {
        let labels = unique_labels(&image);
        Self {
            name: name.into(),
            image,
            labels,
            measurements: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Object set name (the pipeline key it was stored under).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying label image.
    #[must_use]
    pub const fn image(&self) -> &Array<Label> {
        &self.image
    }

    /// Sorted unique positive labels present in the image.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Append a measurement table.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::IndexMismatch`] unless the table index
    /// equals [`labels`](Self::labels) element by element, and
    /// [`HandleError::DuplicateColumns`] if any column name repeats
    /// within the table, is already taken by a measurement or attribute,
    /// or is [`IS_BORDER`].
    pub fn add_measurement(&mut self, measurement: Frame) -> Result<(), HandleError> {
        self.check_index(measurement.index())?;
        self.check_names(measurement.column_names())?;

        tracing::debug!(
            objects = %self.name,
            columns = measurement.columns().len(),
            "add measurement"
        );
        self.measurements.push(measurement);
        Ok(())
    }

    /// Append an attribute series.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::EmptyAttributeName`] for an unnamed series,
    /// [`HandleError::IndexMismatch`] unless the series index equals
    /// [`labels`](Self::labels), and [`HandleError::DuplicateColumns`] if
    /// a measurement column or attribute of the same name already exists
    /// or the name is [`IS_BORDER`].
    pub fn add_attribute(&mut self, attribute: Series) -> Result<(), HandleError> {
        if attribute.name().is_empty() {
            return Err(HandleError::EmptyAttributeName {
                handle: self.name.clone(),
            });
        }
        self.check_index(attribute.index())?;
        self.check_names(std::iter::once(attribute.name()))?;

        tracing::debug!(objects = %self.name, attribute = attribute.name(), "add attribute");
        self.attributes.push(attribute);
        Ok(())
    }

    /// All measurements concatenated column-wise. Without measurements
    /// this is a table of the object labels with no columns.
    #[must_use]
    pub fn measurements(&self) -> Frame {
        if self.measurements.is_empty() {
            return Frame::new(self.labels.clone());
        }
        Frame::concat(&self.measurements)
    }

    /// All attributes as columns of one table indexed by the labels.
    #[must_use]
    pub fn attributes(&self) -> Frame {
        if self.attributes.is_empty() {
            return Frame::new(self.labels.clone());
        }
        // Every series index was checked against the labels on append.
        Frame::from_parts(
            self.labels.clone(),
            self.attributes.iter().cloned().map(Column::from).collect(),
        )
    }

    /// Whether each object touches the image boundary, indexed by label.
    #[must_use]
    pub fn is_border(&self) -> Series {
        let mut border = BTreeSet::new();
        let (h, w) = (self.image.height(), self.image.width());
        for z in 0..self.image.planes() {
            let plane = self.image.plane(z);
            for y in 0..h {
                let row = &plane[y * w..(y + 1) * w];
                if y == 0 || y + 1 == h {
                    border.extend(row.iter().copied().filter(|&v| v > 0));
                } else if w > 0 {
                    border.extend([row[0], row[w - 1]].into_iter().filter(|&v| v > 0));
                }
            }
        }
        let flags = self.labels.iter().map(|l| border.contains(l)).collect();
        Series::from_parts(IS_BORDER, self.labels.clone(), ColumnData::Bool(flags))
    }

    /// Outline polygons of all objects in the global map frame.
    ///
    /// Image border pixels are treated as background so that objects at
    /// the edge of the field of view still get closed outlines. Each
    /// object's outer border is traced, closed, approximated to within
    /// `tolerance` pixels (`0` keeps every traced vertex), and mapped to
    /// `(y, x) = (-(row + offset_y), column + offset_x)`.
    ///
    /// Objects with more than one disjoint border keep the first one in
    /// raster order; the event is logged as a warning. Objects that lie
    /// entirely on the image border have no interior and are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Dimensionality`] for 3D label images.
    pub fn outlines(
        &self,
        offset_y: i64,
        offset_x: i64,
        tolerance: f64,
    ) -> Result<BTreeMap<Label, Outline>, HandleError> {
        if self.image.ndim() != 2 {
            return Err(HandleError::Dimensionality {
                handle: self.name.clone(),
                expected: "2D for outline extraction",
                found: self.image.ndim(),
            });
        }
        tracing::debug!(objects = %self.name, "calculate outlines");

        let (h, w) = (self.image.height(), self.image.width());
        let boxes = interior_bounding_boxes(&self.image);
        let mut outlines = BTreeMap::new();

        for &label in &self.labels {
            let Some(bbox) = boxes.get(&label) else {
                tracing::warn!(objects = %self.name, label, "object has no interior pixels, skipping outline");
                continue;
            };
            // Interior pixels are at least one pixel away from the image
            // edge, so the padded crop stays inside the image.
            let (y0, x0) = (bbox.min_y - 1, bbox.min_x - 1);
            let (ch, cw) = (bbox.max_y + 2 - y0, bbox.max_x + 2 - x0);
            let mask = GrayImage::from_fn(to_u32(cw), to_u32(ch), |cx, cy| {
                let (y, x) = (y0 + cy as usize, x0 + cx as usize);
                let inside = y > 0 && x > 0 && y + 1 < h && x + 1 < w;
                let hit = inside && self.image.as_slice()[y * w + x] == label;
                image::Luma([if hit { 255 } else { 0 }])
            });

            let mut contours = trace_outer_contours(&mask);
            if contours.len() > 1 {
                tracing::warn!(
                    objects = %self.name,
                    label,
                    count = contours.len(),
                    "multiple contours identified for object, keeping the first"
                );
            }
            if contours.is_empty() {
                continue;
            }
            let ring = close_ring(contours.swap_remove(0));
            let simplified = approximate_polygon(&ring, tolerance);
            let points = simplified
                .points()
                .iter()
                .map(|p| MapPoint {
                    y: -(to_i64(p.y) + to_i64_usize(y0) + offset_y),
                    x: to_i64(p.x) + to_i64_usize(x0) + offset_x,
                })
                .collect();
            outlines.insert(label, Outline::new(points));
        }
        Ok(outlines)
    }

    /// Names already used by measurements, attributes and the border flag.
    fn taken_names(&self) -> HashSet<&str> {
        self.measurements
            .iter()
            .flat_map(Frame::column_names)
            .chain(self.attributes.iter().map(Series::name))
            .chain(std::iter::once(IS_BORDER))
            .collect()
    }

    fn check_names<'n>(&self, names: impl Iterator<Item = &'n str>) -> Result<(), HandleError> {
        let taken = self.taken_names();
        let mut seen = HashSet::new();
        let duplicates: Vec<String> = names
            .filter(|name| taken.contains(name) || !seen.insert(*name))
            .map(str::to_string)
            .collect();
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(HandleError::DuplicateColumns {
                objects: self.name.clone(),
                columns: duplicates,
            })
        }
    }

    fn check_index(&self, index: &[Label]) -> Result<(), HandleError> {
        if index == self.labels.as_slice() {
            Ok(())
        } else {
            Err(HandleError::IndexMismatch {
                objects: self.name.clone(),
                expected: self.labels.clone(),
                found: index.to_vec(),
            })
        }
    }
}

/// Sorted unique positive values of a label image.
#[must_use]
pub fn unique_labels(image: &Array<Label>) -> Vec<Label> {
    image
        .as_slice()
        .iter()
        .copied()
        .filter(|&v| v > 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct BoundingBox {
    min_y: usize,
    min_x: usize,
    max_y: usize,
    max_x: usize,
}

/// Bounding boxes of every label, ignoring the one-pixel image border.
fn interior_bounding_boxes(image: &Array<Label>) -> BTreeMap<Label, BoundingBox> {
    let (h, w) = (image.height(), image.width());
    let mut boxes: BTreeMap<Label, BoundingBox> = BTreeMap::new();
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let label = image.as_slice()[y * w + x];
            if label <= 0 {
                continue;
            }
            boxes
                .entry(label)
                .and_modify(|b| {
                    b.min_y = b.min_y.min(y);
                    b.min_x = b.min_x.min(x);
                    b.max_y = b.max_y.max(y);
                    b.max_x = b.max_x.max(x);
                })
                .or_insert(BoundingBox {
                    min_y: y,
                    min_x: x,
                    max_y: y,
                    max_x: x,
                });
        }
    }
    boxes
}

/// Repeat the first vertex at the end so the polyline is a closed ring.
fn close_ring(contour: Polyline) -> Polyline {
    let points = contour.points();
    match (points.first(), points.last()) {
        (Some(&first), Some(&last)) if points.len() > 1 && first != last => {
            let mut closed = points.to_vec();
            closed.push(first);
            Polyline::new(closed)
        }
        _ => contour,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_i64(v: f64) -> i64 {
    v as i64
}

#[allow(clippy::cast_possible_wrap)]
const fn to_i64_usize(v: usize) -> i64 {
    v as i64
}

#[allow(clippy::cast_possible_truncation)]
const fn to_u32(v: usize) -> u32 {
    v as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// 10x10 label image with a 3x3 object 1 in the interior, a 2x2
    /// object 3 touching the left edge, and object 7 in the bottom right.
    fn sample() -> ObjectSet {
        let mut data = vec![0; 100];
        for y in 2..5 {
            for x in 3..6 {
                data[y * 10 + x] = 1;
            }
        }
        for y in 6..8 {
            for x in 0..2 {
                data[y * 10 + x] = 3;
            }
        }
        data[8 * 10 + 8] = 7;
        ObjectSet::new("nuclei", Array::from_shape_vec(vec![10, 10], data).unwrap())
    }

    fn measurement(index: Vec<Label>, names: &[&str]) -> Frame {
        let rows = index.len();
        names.iter().fold(Frame::new(index), |f, name| {
            f.with_column(*name, ColumnData::Float(vec![1.0; rows])).unwrap()
        })
    }

    #[test]
    fn labels_are_sorted_unique_positive() {
        let image = Array::from_shape_vec(vec![2, 3], vec![5, 0, 2, 2, -1, 5]).unwrap();
        assert_eq!(ObjectSet::new("x", image).labels(), &[2, 5]);
    }

    #[test]
    fn tables_without_data_keep_the_label_index() {
        let set = sample();
        assert!(set.measurements().is_empty());
        assert!(set.attributes().is_empty());
        assert_eq!(set.measurements().index(), set.labels());
        assert_eq!(set.attributes().index(), set.labels());
    }

    #[test]
    fn measurement_with_wrong_index_is_rejected_without_mutation() {
        let mut set = sample();
        set.add_measurement(measurement(vec![1, 3, 7], &["area"])).unwrap();
        let before = set.measurements();

        let err = set
            .add_measurement(measurement(vec![3, 1, 7], &["perimeter"]))
            .unwrap_err();
        assert!(matches!(err, HandleError::IndexMismatch { .. }));
        assert_eq!(set.measurements(), before);
    }

    #[test]
    fn duplicate_columns_across_measurements_are_rejected() {
        let mut set = sample();
        set.add_measurement(measurement(vec![1, 3, 7], &["area"])).unwrap();
        let err = set
            .add_measurement(measurement(vec![1, 3, 7], &["area", "extent"]))
            .unwrap_err();
        assert_eq!(
            err,
            HandleError::DuplicateColumns {
                objects: "nuclei".to_string(),
                columns: vec!["area".to_string()],
            }
        );
        assert_eq!(set.measurements().columns().len(), 1);
    }

    #[test]
    fn duplicate_columns_within_a_measurement_are_rejected() {
        let mut set = sample();
        let err = set
            .add_measurement(measurement(vec![1, 3, 7], &["area", "area"]))
            .unwrap_err();
        assert!(matches!(err, HandleError::DuplicateColumns { .. }));
    }

    #[test]
    fn disjoint_measurements_are_concatenated() {
        let mut set = sample();
        set.add_measurement(measurement(vec![1, 3, 7], &["area"])).unwrap();
        set.add_measurement(measurement(vec![1, 3, 7], &["mean", "max"])).unwrap();
        let table = set.measurements();
        assert_eq!(table.index(), &[1, 3, 7]);
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["area", "mean", "max"]
        );
    }

    #[test]
    fn attribute_cannot_reuse_a_measurement_column() {
        let mut set = sample();
        set.add_measurement(measurement(vec![1, 3, 7], &["is_large"])).unwrap();
        let attribute =
            Series::new("is_large", vec![1, 3, 7], ColumnData::Bool(vec![true; 3])).unwrap();
        assert_eq!(
            set.add_attribute(attribute),
            Err(HandleError::DuplicateColumns {
                objects: "nuclei".to_string(),
                columns: vec!["is_large".to_string()],
            })
        );
        assert!(set.attributes().is_empty());
    }

    #[test]
    fn measurement_cannot_reuse_an_attribute_name() {
        let mut set = sample();
        let attribute =
            Series::new("kind", vec![1, 3, 7], ColumnData::Int(vec![0, 1, 2])).unwrap();
        set.add_attribute(attribute).unwrap();
        let err = set
            .add_measurement(measurement(vec![1, 3, 7], &["area", "kind"]))
            .unwrap_err();
        assert_eq!(
            err,
            HandleError::DuplicateColumns {
                objects: "nuclei".to_string(),
                columns: vec!["kind".to_string()],
            }
        );
        assert!(set.measurements().is_empty());
    }

    #[test]
    fn border_flag_name_is_reserved() {
        let mut set = sample();
        assert!(matches!(
            set.add_measurement(measurement(vec![1, 3, 7], &[IS_BORDER])),
            Err(HandleError::DuplicateColumns { .. })
        ));
        let attribute =
            Series::new(IS_BORDER, vec![1, 3, 7], ColumnData::Bool(vec![false; 3])).unwrap();
        assert!(matches!(
            set.add_attribute(attribute),
            Err(HandleError::DuplicateColumns { .. })
        ));
    }

    #[test]
    fn attributes_require_name_and_index() {
        let mut set = sample();
        let unnamed = Series::new("", vec![1, 3, 7], ColumnData::Bool(vec![true; 3])).unwrap();
        assert!(matches!(
            set.add_attribute(unnamed),
            Err(HandleError::EmptyAttributeName { .. })
        ));
        let short = Series::new("kind", vec![1, 3], ColumnData::Int(vec![0, 1])).unwrap();
        assert!(matches!(
            set.add_attribute(short),
            Err(HandleError::IndexMismatch { .. })
        ));
        let ok = Series::new("kind", vec![1, 3, 7], ColumnData::Int(vec![0, 1, 2])).unwrap();
        set.add_attribute(ok).unwrap();
        assert_eq!(
            set.attributes().column("kind"),
            Some(&ColumnData::Int(vec![0, 1, 2]))
        );
    }

    #[test]
    fn border_objects_are_flagged() {
        let set = sample();
        let border = set.is_border();
        assert_eq!(border.name(), "is_border");
        assert_eq!(border.index(), &[1, 3, 7]);
        assert_eq!(border.data(), &ColumnData::Bool(vec![false, true, false]));
    }

    #[test]
    fn outlines_use_flipped_global_frame() {
        let set = sample();
        let outlines = set.outlines(100, 50, 0.0).unwrap();
        let square = &outlines[&1];
        // Rows 2..=4 and columns 3..=5.
        assert!(square.points().iter().all(|p| (-104..=-102).contains(&p.y)));
        assert!(square.points().iter().all(|p| (53..=55).contains(&p.x)));
        assert_eq!(square.points().iter().map(|p| p.y).max(), Some(-102));
        assert_eq!(square.points().first(), square.points().last());
    }

    #[test]
    fn outlines_are_idempotent() {
        let set = sample();
        assert_eq!(set.outlines(7, 3, 1.0).unwrap(), set.outlines(7, 3, 1.0).unwrap());
    }

    #[test]
    fn tolerance_reduces_vertices() {
        let set = sample();
        let exact = set.outlines(0, 0, 0.0).unwrap();
        let coarse = set.outlines(0, 0, 1.0).unwrap();
        assert!(coarse[&1].len() < exact[&1].len());
        // The square reduces to its four corners plus the closing vertex.
        assert_eq!(coarse[&1].len(), 5);
    }

    #[test]
    fn object_at_edge_gets_closed_outline() {
        let set = sample();
        let outlines = set.outlines(0, 0, 0.0).unwrap();
        // Column 0 is cleared, leaving column 1 of rows 6..=7.
        let edge = &outlines[&3];
        assert!(edge.points().iter().all(|p| p.x == 1));
        assert!(edge.points().iter().all(|p| (-7..=-6).contains(&p.y)));
    }

    #[test]
    fn split_object_keeps_first_contour() {
        let mut data = vec![0; 64];
        data[8 + 1] = 4;
        data[5 * 8 + 5] = 4;
        let set = ObjectSet::new("cells", Array::from_shape_vec(vec![8, 8], data).unwrap());
        let outlines = set.outlines(0, 0, 0.0).unwrap();
        assert_eq!(outlines[&4].points()[0], MapPoint { y: -1, x: 1 });
    }

    #[test]
    fn outlines_reject_3d_images() {
        let set = ObjectSet::new("cells", Array::from_shape_vec(vec![2, 3, 3], vec![0; 18]).unwrap());
        assert!(matches!(
            set.outlines(0, 0, 1.0),
            Err(HandleError::Dimensionality { found: 3, .. })
        ));
    }
}
