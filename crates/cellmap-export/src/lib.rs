//! cellmap-export: Pure serializers (sans-IO)
//!
//! Converts accumulated object data into exchange formats: feature
//! tables as CSV and object outlines as `GeoJSON` feature collections.
//! Every function returns a value; writing it anywhere is up to the
//! caller.

pub mod csv;
pub mod geojson;

pub use csv::{CsvBlock, ExportError, to_csv};
pub use geojson::{OutlineLayer, to_feature_collection};
