//! Shared value types exchanged between pipeline modules.
//!
//! Module functions are opaque to the executor, so everything they
//! receive or return travels as a dynamic [`Value`]. The handle layer
//! (see [`crate::handles`]) inspects the variant and element type of
//! each value before it is allowed into the job store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Object identifier in a label image. Zero is background.
pub type Label = i32;

/// Element type of an [`ArrayData`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Boolean.
    Bool,
    /// 64-bit floating point.
    F64,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::I32 => "int32",
            Self::Bool => "bool",
            Self::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Errors raised when constructing arrays, series, or tables with
/// inconsistent dimensions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// Only 2D and 3D arrays are supported.
    #[error("arrays must be 2D or 3D, got {0} dimensions")]
    Dimensionality(usize),

    /// The buffer length does not match the product of the shape.
    #[error("shape {shape:?} holds {expected} elements but {found} were given")]
    Length {
        /// Requested shape.
        shape: Vec<usize>,
        /// Number of elements implied by `shape`.
        expected: usize,
        /// Number of elements supplied.
        found: usize,
    },

    /// A column or series does not have one value per index row.
    #[error("column \"{column}\" has {found} rows but the index has {expected}")]
    ColumnLength {
        /// Column or series name.
        column: String,
        /// Number of index rows.
        expected: usize,
        /// Number of values in the column.
        found: usize,
    },
}

// ───────────────────────────── Arrays ─────────────────────────────

/// A dense, row-major 2D `(height, width)` or 3D `(planes, height, width)`
/// array.
#[derive(Debug, Clone, PartialEq)]
pub struct Array<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> Array<T> {
    /// Wrap a row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Dimensionality`] unless `shape` has two or
    /// three axes, and [`ShapeError::Length`] if `data` does not hold
    /// exactly the number of elements the shape implies.
    pub fn from_shape_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self, ShapeError> {
        if !(2..=3).contains(&shape.len()) {
            return Err(ShapeError::Dimensionality(shape.len()));
        }
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShapeError::Length {
                shape,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// The array shape, outermost axis first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes (2 or 3).
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of rows in each plane.
    #[must_use]
    pub fn height(&self) -> usize {
        self.shape[self.shape.len() - 2]
    }

    /// Number of columns in each plane.
    #[must_use]
    pub fn width(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    /// Number of planes (1 for 2D arrays).
    #[must_use]
    pub fn planes(&self) -> usize {
        if self.shape.len() == 3 {
            self.shape[0]
        } else {
            1
        }
    }

    /// All elements in row-major order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The elements of plane `z` in row-major order.
    #[must_use]
    pub fn plane(&self, z: usize) -> &[T] {
        let size = self.height() * self.width();
        &self.data[z * size..(z + 1) * size]
    }

    /// Element at row `y`, column `x` of the first plane.
    #[must_use]
    pub fn get(&self, y: usize, x: usize) -> Option<&T> {
        if y >= self.height() || x >= self.width() {
            return None;
        }
        self.data.get(y * self.width() + x)
    }

    /// Apply `f` to every element, keeping the shape.
    #[must_use]
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Array<U> {
        Array {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Consume the array and return the row-major buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/// A typed array as produced or consumed by a module.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// 8-bit intensities.
    U8(Array<u8>),
    /// 16-bit intensities.
    U16(Array<u16>),
    /// Labels.
    I32(Array<i32>),
    /// Masks.
    Bool(Array<bool>),
    /// Floating point data (e.g. probability maps).
    F64(Array<f64>),
}

impl ArrayData {
    /// The element type of the buffer.
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::U8(_) => ElementType::U8,
            Self::U16(_) => ElementType::U16,
            Self::I32(_) => ElementType::I32,
            Self::Bool(_) => ElementType::Bool,
            Self::F64(_) => ElementType::F64,
        }
    }

    /// The array shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::U8(a) => a.shape(),
            Self::U16(a) => a.shape(),
            Self::I32(a) => a.shape(),
            Self::Bool(a) => a.shape(),
            Self::F64(a) => a.shape(),
        }
    }

    /// Intensities widened to `f64`, or `None` for non-intensity arrays.
    #[must_use]
    pub fn intensities(&self) -> Option<Array<f64>> {
        match self {
            Self::U8(a) => Some(a.map(|&v| f64::from(v))),
            Self::U16(a) => Some(a.map(|&v| f64::from(v))),
            _ => None,
        }
    }
}

impl From<Array<u8>> for ArrayData {
    fn from(a: Array<u8>) -> Self {
        Self::U8(a)
    }
}

impl From<Array<u16>> for ArrayData {
    fn from(a: Array<u16>) -> Self {
        Self::U16(a)
    }
}

impl From<Array<i32>> for ArrayData {
    fn from(a: Array<i32>) -> Self {
        Self::I32(a)
    }
}

impl From<Array<bool>> for ArrayData {
    fn from(a: Array<bool>) -> Self {
        Self::Bool(a)
    }
}

impl From<Array<f64>> for ArrayData {
    fn from(a: Array<f64>) -> Self {
        Self::F64(a)
    }
}

// ───────────────────────────── Tables ─────────────────────────────

/// Values of one table column or series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum ColumnData {
    /// Floating point values. Non-finite values are stored as `null` and
    /// read back as NaN.
    Float(#[serde(with = "nullable_floats")] Vec<f64>),
    /// Integer values.
    Int(Vec<i64>),
    /// Boolean values.
    Bool(Vec<bool>),
    /// Free text.
    Text(Vec<String>),
}

/// JSON has no NaN or infinity, so those become `null` on disk.
mod nullable_floats {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

impl ColumnData {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    /// Returns `true` if the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the element type, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
        }
    }

    /// Render row `row` as text, e.g. for CSV export.
    #[must_use]
    pub fn format_row(&self, row: usize) -> Option<String> {
        match self {
            Self::Float(v) => v.get(row).map(f64::to_string),
            Self::Int(v) => v.get(row).map(i64::to_string),
            Self::Bool(v) => v.get(row).map(bool::to_string),
            Self::Text(v) => v.get(row).cloned(),
        }
    }
}

/// A named, label-indexed one-dimensional series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesProxy")]
pub struct Series {
    name: String,
    index: Vec<Label>,
    data: ColumnData,
}

#[derive(Deserialize)]
struct SeriesProxy {
    name: String,
    index: Vec<Label>,
    data: ColumnData,
}

impl TryFrom<SeriesProxy> for Series {
    type Error = ShapeError;

    fn try_from(proxy: SeriesProxy) -> Result<Self, Self::Error> {
        Self::new(proxy.name, proxy.index, proxy.data)
    }
}

impl Series {
    /// Create a series with one value per index entry.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ColumnLength`] if `data` and `index` differ
    /// in length.
    pub fn new(
        name: impl Into<String>,
        index: Vec<Label>,
        data: ColumnData,
    ) -> Result<Self, ShapeError> {
        let name = name.into();
        if data.len() != index.len() {
            return Err(ShapeError::ColumnLength {
                column: name,
                expected: index.len(),
                found: data.len(),
            });
        }
        Ok(Self { name, index, data })
    }

    /// Build a series whose length was already checked by the caller.
    pub(crate) fn from_parts(name: impl Into<String>, index: Vec<Label>, data: ColumnData) -> Self {
        debug_assert_eq!(index.len(), data.len());
        Self {
            name: name.into(),
            index,
            data,
        }
    }

    /// Series name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Row labels.
    #[must_use]
    pub fn index(&self) -> &[Label] {
        &self.index
    }

    /// Series values.
    #[must_use]
    pub const fn data(&self) -> &ColumnData {
        &self.data
    }
}

/// One named column of a [`Frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column values, one per index row.
    pub data: ColumnData,
}

/// A label-indexed table with named, typed columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameProxy")]
pub struct Frame {
    index: Vec<Label>,
    columns: Vec<Column>,
}

#[derive(Deserialize)]
struct FrameProxy {
    index: Vec<Label>,
    columns: Vec<Column>,
}

impl TryFrom<FrameProxy> for Frame {
    type Error = ShapeError;

    fn try_from(proxy: FrameProxy) -> Result<Self, Self::Error> {
        proxy
            .columns
            .into_iter()
            .try_fold(Self::new(proxy.index), |frame, c| {
                frame.with_column(c.name, c.data)
            })
    }
}

impl Frame {
    /// Create a table with the given row index and no columns.
    #[must_use]
    pub const fn new(index: Vec<Label>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Append a column.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ColumnLength`] if the column does not have
    /// one value per index row.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        data: ColumnData,
    ) -> Result<Self, ShapeError> {
        let name = name.into();
        if data.len() != self.index.len() {
            return Err(ShapeError::ColumnLength {
                column: name,
                expected: self.index.len(),
                found: data.len(),
            });
        }
        self.columns.push(Column { name, data });
        Ok(self)
    }

    /// Build a table whose column lengths were already checked by the
    /// caller.
    pub(crate) fn from_parts(index: Vec<Label>, columns: Vec<Column>) -> Self {
        debug_assert!(columns.iter().all(|c| c.data.len() == index.len()));
        Self { index, columns }
    }

    /// Row labels.
    #[must_use]
    pub fn index(&self) -> &[Label] {
        &self.index
    }

    /// All columns in insertion order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.data)
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the table has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Rename every column with `f`.
    #[must_use]
    pub fn rename_columns(mut self, mut f: impl FnMut(&str) -> String) -> Self {
        for column in &mut self.columns {
            column.name = f(&column.name);
        }
        self
    }

    /// Concatenate tables column-wise.
    ///
    /// Callers guarantee that all tables share the same index; the index
    /// of the first table is used. Returns an empty table for no input.
    #[must_use]
    pub fn concat<'a>(frames: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut iter = frames.into_iter();
        let Some(first) = iter.next() else {
            return Self::default();
        };
        let mut out = first.clone();
        for frame in iter {
            out.columns.extend(frame.columns.iter().cloned());
        }
        out
    }
}

impl From<Series> for Column {
    fn from(series: Series) -> Self {
        Self {
            name: series.name,
            data: series.data,
        }
    }
}

// ───────────────────────────── Values ─────────────────────────────

/// A value passed to or returned from a module function.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar or markup.
    Str(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Pixel or voxel array.
    Array(ArrayData),
    /// Label-indexed table.
    Table(Frame),
    /// Label-indexed series.
    Series(Series),
}

impl Value {
    /// Human-readable type description used in contract violations.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Int(_) => "int".to_string(),
            Self::Float(_) => "float".to_string(),
            Self::Str(_) => "str".to_string(),
            Self::List(_) => "list".to_string(),
            Self::Array(a) => format!("array<{}>", a.element_type()),
            Self::Table(_) => "table".to_string(),
            Self::Series(_) => "series".to_string(),
        }
    }
}

impl From<ArrayData> for Value {
    fn from(a: ArrayData) -> Self {
        Self::Array(a)
    }
}

impl From<Frame> for Value {
    fn from(f: Frame) -> Self {
        Self::Table(f)
    }
}

impl From<Series> for Value {
    fn from(s: Series) -> Self {
        Self::Series(s)
    }
}

// ──────────────────────────── Geometry ────────────────────────────

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// A sequence of connected points in image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }
}

/// A vertex of an object outline in the global map frame.
///
/// The map frame grows upwards: `y` is the negated global row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapPoint {
    /// Negated global row.
    pub y: i64,
    /// Global column.
    pub x: i64,
}

/// The closed polygon outline of one object, in map coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline(Vec<MapPoint>);

impl Outline {
    /// Create an outline from its vertices.
    #[must_use]
    pub const fn new(points: Vec<MapPoint>) -> Self {
        Self(points)
    }

    /// Outline vertices in tracing order.
    #[must_use]
    pub fn points(&self) -> &[MapPoint] {
        &self.0
    }

    /// Number of vertices.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the outline has no vertices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}
