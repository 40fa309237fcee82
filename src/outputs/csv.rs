//! CSV output for normalized price tables.
//!
//! # Format
//!
//! - UTF-8 with a leading byte-order mark, so spreadsheet tools pick the
//!   right encoding for the Japanese column values
//! - header row: the table's columns (canonical first, then extras)
//! - `date` as `YYYY-MM-DD`
//! - prices in decimal form, always with a fractional part (`456.0`)
//! - `volume` as integer text; every null cell is left blank

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

use crate::error::CrawlError;
use crate::models::{Column, Field, PriceRecord, PriceTable};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Recovery file path for a final output path: `x.csv` → `x.partial.csv`.
pub fn partial_path(output: &Path) -> PathBuf {
    output.with_extension("partial.csv")
}

/// Plain decimal text with at least one fractional digit; non-finite
/// values are written as null.
fn format_price(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    // Display never switches to exponent notation but drops ".0".
    let text = value.to_string();
    Some(if text.contains('.') { text } else { format!("{text}.0") })
}

/// Render one cell of `record` for `column`.
pub fn cell_text(record: &PriceRecord, column: &Column) -> String {
    match column {
        Column::Known(Field::Date) => record.date.format("%Y-%m-%d").to_string(),
        Column::Known(Field::Volume) => record.volume.map(|v| v.to_string()).unwrap_or_default(),
        Column::Known(field) => record.price(*field).and_then(format_price).unwrap_or_default(),
        Column::Unknown(name) => record.extra_value(name).unwrap_or_default().to_string(),
    }
}

/// Serialize a table to CSV bytes, BOM included.
pub fn to_csv_bytes(table: &PriceTable) -> Result<Vec<u8>, ::csv::Error> {
    let columns = if table.columns.is_empty() {
        PriceTable::empty().columns
    } else {
        table.columns.clone()
    };

    let mut writer = ::csv::Writer::from_writer(UTF8_BOM.to_vec());
    writer.write_record(columns.iter().map(Column::name))?;
    for record in &table.records {
        writer.write_record(columns.iter().map(|c| cell_text(record, c)))?;
    }
    writer
        .into_inner()
        .map_err(|e| ::csv::Error::from(e.into_error()))
}

/// Write a table to `path` as BOM-prefixed CSV.
///
/// The file is replaced wholesale, so calling this repeatedly with a growing
/// table leaves a complete snapshot after each call.
///
/// # Arguments
///
/// * `path` - Destination file; missing parent directories are created
/// * `table` - Records to write; an empty table writes the canonical header only
///
/// # Returns
///
/// `Ok(())` once the file is written, or a [`CrawlError`] for a CSV or I/O
/// failure.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), rows = table.len()))]
pub async fn write_table(path: &Path, table: &PriceTable) -> Result<(), CrawlError> {
    let bytes = to_csv_bytes(table)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await?;
    debug!("Wrote CSV");
    Ok(())
}
