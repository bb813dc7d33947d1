//! CSV Export
//!
//! Writes accumulated rows as CSV. Columns are the union of all row keys in
//! order of first appearance; there is no index column.

use crate::error::Result;
use crate::query::Row;
use serde_json::Value;
use std::io::Write;
use std::path::Path;

/// Write rows to a CSV file, replacing any existing file
pub fn write_csv(rows: &[Row], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_rows(rows, file)?;
    tracing::info!("Wrote {} records to {}", rows.len(), path.display());
    Ok(())
}

/// Write rows as CSV to any writer
///
/// Zero rows produce no output at all, since there are no columns to name.
pub fn write_rows<W: Write>(rows: &[Row], output: W) -> Result<()> {
    let columns = collect_columns(rows);
    let mut writer = csv::Writer::from_writer(output);

    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }

    for row in rows {
        writer.write_record(
            columns
                .iter()
                .map(|column| row.get(column.as_str()).map(render_cell).unwrap_or_default()),
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// Column names in order of first appearance across rows
fn collect_columns(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Render a JSON value as a CSV cell
fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Nested structures keep their JSON form
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
