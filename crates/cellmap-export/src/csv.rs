//! CSV export of label-indexed feature tables.
//!
//! Several tables (typically one per imaging site) are written one after
//! the other under a single header. Each block carries context columns
//! (plate, well, site position, ...) that are repeated on every row, then
//! the object label, then the table's own columns.
//!
//! Fields are quoted only when they contain a comma, a double quote, or a
//! line break; embedded quotes are doubled.

use std::fmt::Write;

use cellmap_pipeline::Frame;

/// Errors raised while serializing tables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    /// A block does not have the same columns as the first block.
    #[error("block {block} has columns [{}], expected [{}]", found.join(", "), expected.join(", "))]
    ColumnMismatch {
        /// Zero-based position of the offending block.
        block: usize,
        /// Header derived from the first block.
        expected: Vec<String>,
        /// Header of the offending block.
        found: Vec<String>,
    },
}

/// One table plus the context values prepended to each of its rows.
#[derive(Debug, Clone)]
pub struct CsvBlock<'a> {
    /// `(column name, value)` pairs, in output order.
    pub context: Vec<(&'a str, String)>,
    /// The feature table.
    pub table: &'a Frame,
}

impl CsvBlock<'_> {
    fn header(&self) -> Vec<String> {
        self.context
            .iter()
            .map(|(name, _)| (*name).to_string())
            .chain(std::iter::once("label".to_string()))
            .chain(self.table.column_names().map(str::to_string))
            .collect()
    }
}

/// Serialize blocks under one shared header.
///
/// Returns an empty string when there are no blocks.
///
/// # Errors
///
/// Returns [`ExportError::ColumnMismatch`] if the blocks do not all share
/// the same context and table columns.
///
/// # Examples
///
/// ```
/// use cellmap_export::{CsvBlock, to_csv};
/// use cellmap_pipeline::{ColumnData, Frame};
///
/// let table = Frame::new(vec![1, 2])
///     .with_column("area", ColumnData::Float(vec![9.0, 6.5]))
///     .unwrap();
/// let csv = to_csv(&[CsvBlock {
///     context: vec![("well", "A01".to_string())],
///     table: &table,
/// }])
/// .unwrap();
/// assert_eq!(csv, "well,label,area\nA01,1,9\nA01,2,6.5\n");
/// ```
pub fn to_csv(blocks: &[CsvBlock<'_>]) -> Result<String, ExportError> {
    let Some(first) = blocks.first() else {
        return Ok(String::new());
    };
    let header = first.header();

    let mut out = String::new();
    write_record(&mut out, header.iter().map(String::as_str));

    for (i, block) in blocks.iter().enumerate() {
        let found = block.header();
        if found != header {
            return Err(ExportError::ColumnMismatch {
                block: i,
                expected: header,
                found,
            });
        }
        for (row, label) in block.table.index().iter().enumerate() {
            let label = label.to_string();
            let cells: Vec<String> = block
                .table
                .columns()
                .iter()
                .map(|c| c.data.format_row(row).unwrap_or_default())
                .collect();
            write_record(
                &mut out,
                block
                    .context
                    .iter()
                    .map(|(_, v)| v.as_str())
                    .chain(std::iter::once(label.as_str()))
                    .chain(cells.iter().map(String::as_str)),
            );
        }
    }
    Ok(out)
}

fn write_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape(field));
    }
    out.push('\n');
}

/// Quote a field if it contains a delimiter, quote, or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        let mut quoted = String::with_capacity(field.len() + 2);
        let _ = write!(quoted, "\"{}\"", field.replace('"', "\"\""));
        quoted
    } else {
        field.to_string()
    }
}
