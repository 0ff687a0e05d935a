//! Reading per-device source tables.

use crate::error::{PipelineError, Result, ResultExt};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::path::Path;

/// Read a device's CSV source table (header row, comma separated).
///
/// Every column is read as `String`; numeric parsing belongs to the cleaner,
/// so a column whose values drift from integers to decimals late in the file
/// still loads. Empty fields come back as nulls.
///
/// A missing file is reported as [`PipelineError::SourceNotFound`] so that it
/// is distinguishable from a file that exists but cannot be parsed.
pub fn read_source_table(path: &Path) -> Result<DataFrame> {
    if !path.is_file() {
        return Err(PipelineError::SourceNotFound(path.display().to_string()));
    }

    CsvReadOptions::default()
        .with_has_header(true)
        // a zero-length inference window reads every column as String
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .context(format!("Failed to parse {}", path.display()))
}
