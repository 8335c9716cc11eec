//! Tabular datasets: loading, summaries and snapshot history
//!
//! Rows are JSON objects ([`Row`]). A loaded dataset is never mutated in
//! place: cleaning produces a new snapshot and the previous one is kept on an
//! undo stack.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, WorkbenchError};
use crate::sandbox::Row;

/// Immutable dataset snapshot
pub type Snapshot = Arc<Vec<Row>>;

const MAX_VALUE_CHARS: usize = 100;
const TOP_VALUES: usize = 3;
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Loading
// ============================================================================

/// Load rows from a CSV file, a JSON records file or the first table of a
/// SQLite file
pub fn load_dataset(path: &Path) -> Result<Vec<Row>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                WorkbenchError::Dataset(format!("failed to read {}: {}", path.display(), e))
            })?;
            parse_csv_rows(&text)
        }
        "json" => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                WorkbenchError::Dataset(format!("failed to read {}: {}", path.display(), e))
            })?;
            parse_json_rows(&text)
        }
        "sqlite" | "sqlite3" | "db" | "s3db" | "sl3" => load_sqlite(path),
        other => Err(WorkbenchError::Dataset(format!(
            "unsupported dataset format '{}' ({})",
            other,
            path.display()
        ))),
    }
}

/// Parse a JSON array of row objects
pub fn parse_json_rows(text: &str) -> Result<Vec<Row>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| WorkbenchError::Dataset(format!("invalid JSON dataset: {}", e)))?;
    let Value::Array(items) = value else {
        return Err(WorkbenchError::Dataset(
            "JSON dataset must be an array of objects".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(row) => Ok(row),
            _ => Err(WorkbenchError::Dataset(format!(
                "row {} is not a JSON object",
                index
            ))),
        })
        .collect()
}

/// Parse CSV text with a header row.
///
/// Cells are typed the way a spreadsheet reader would: empty becomes null,
/// `true`/`false` become booleans, numbers become numbers and everything
/// else stays a string.
pub fn parse_csv_rows(text: &str) -> Result<Vec<Row>> {
    let csv_err = |e: csv::Error| WorkbenchError::Dataset(format!("invalid CSV dataset: {}", e));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(column, cell)| (column.clone(), csv_cell(cell)))
            .collect();
        out.push(row);
    }

    tracing::debug!(rows = out.len(), columns = headers.len(), "parsed csv");
    Ok(out)
}

fn csv_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    match trimmed {
        "" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    match trimmed.parse::<f64>() {
        // NaN and infinities have no JSON form
        Ok(f) if f.is_finite() => Number::from_f64(f).map_or(Value::Null, Value::Number),
        Ok(_) => Value::Null,
        Err(_) => Value::String(cell.to_string()),
    }
}

/// Rows of the first table in a SQLite database
pub fn load_sqlite(path: &Path) -> Result<Vec<Row>> {
    let sqlite_err = |e: rusqlite::Error| WorkbenchError::Dataset(format!("sqlite: {}", e));

    let conn = Connection::open(path).map_err(sqlite_err)?;
    let table: Option<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY rowid LIMIT 1")
            .map_err(sqlite_err)?;
        let mut rows = stmt.query([]).map_err(sqlite_err)?;
        match rows.next().map_err(sqlite_err)? {
            Some(row) => Some(row.get(0).map_err(sqlite_err)?),
            None => None,
        }
    };
    let table = table.ok_or(WorkbenchError::NoTablesFound)?;

    let mut stmt = conn
        .prepare(&format!("SELECT * FROM \"{}\"", table.replace('"', "\"\"")))
        .map_err(sqlite_err)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query([]).map_err(sqlite_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(sqlite_err)? {
        let mut record = Row::new();
        for (index, column) in columns.iter().enumerate() {
            let value = match row.get_ref(index).map_err(sqlite_err)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::from(i),
                ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
                ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
            };
            record.insert(column.clone(), value);
        }
        out.push(record);
    }

    tracing::debug!(table = %table, rows = out.len(), "loaded sqlite table");
    Ok(out)
}

// ============================================================================
// Summary
// ============================================================================

/// Describe a dataset for the LLM, one line per column.
///
/// Column kinds are inferred from the first row's value: strings list their
/// most frequent values, numbers their mean/min/max, dates their range.
pub fn describe(rows: &[Row]) -> String {
    let columns: Vec<&String> = rows.first().map(|row| row.keys().collect()).unwrap_or_default();

    let mut summary = format!(
        "The Pandas DataFrame df has {} rows and {} columns:",
        rows.len(),
        columns.len()
    );
    for column in columns {
        summary.push_str(&format!("\n- {}: {}", column, describe_column(rows, column)));
    }
    summary
}

fn describe_column(rows: &[Row], column: &str) -> String {
    let values: Vec<&Value> = rows.iter().filter_map(|row| row.get(column)).collect();

    match values.first() {
        Some(Value::String(first)) if parse_date(first).is_some() => describe_dates(&values),
        Some(Value::String(_)) => describe_strings(&values),
        Some(Value::Number(_)) => describe_numbers(&values),
        Some(Value::Bool(_)) => {
            let truthy = values.iter().filter(|v| v.as_bool() == Some(true)).count();
            format!("boolean. {} true, {} false", truthy, values.len() - truthy)
        }
        _ => String::new(),
    }
}

fn describe_strings(values: &[&Value]) -> String {
    // First-seen order breaks frequency ties
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for value in values {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match index.get(&text) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(text.clone(), counts.len());
                counts.push((text, 1));
            }
        }
    }

    let unique = counts.len();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let top: Vec<String> = counts
        .iter()
        .take(TOP_VALUES)
        .map(|(value, count)| format!("{} ({})", truncate(value), count))
        .collect();

    format!("string. {} unique values. E.g. {}", unique, top.join(", "))
}

fn describe_numbers(values: &[&Value]) -> String {
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.is_empty() {
        return String::new();
    }
    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    format!(
        "numeric. mean: {} min: {} max: {}",
        format_number(mean),
        format_number(min),
        format_number(max)
    )
}

fn describe_dates(values: &[&Value]) -> String {
    let dates: Vec<NaiveDateTime> = values
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(parse_date)
        .collect();
    match (dates.iter().min(), dates.iter().max()) {
        (Some(min), Some(max)) => format!(
            "date. min: {} max: {}",
            min.format(DATE_FORMAT),
            max.format(DATE_FORMAT)
        ),
        _ => String::new(),
    }
}

fn truncate(value: &str) -> String {
    if value.chars().count() > MAX_VALUE_CHARS {
        let head: String = value.chars().take(MAX_VALUE_CHARS).collect();
        format!("{}...", head)
    } else {
        value.to_string()
    }
}

/// ISO dates and datetimes (`2024-01-31`, `2024-01-31 10:00:00`, RFC 3339)
fn parse_date(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Compact short-scale rendering: `1.2K`, `12K`, `3.4M`, `0.012`, `123`.
///
/// Below 100 (after scaling) values keep two significant digits; larger ones
/// are rounded to an integer. Trailing zeros are dropped.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "∞" } else { "-∞" }.to_string();
    }

    const UNITS: [(f64, &str); 5] = [(1.0, ""), (1e3, "K"), (1e6, "M"), (1e9, "B"), (1e12, "T")];

    let mut unit = UNITS
        .iter()
        .rposition(|(scale, _)| value.abs() >= *scale)
        .unwrap_or(0);
    loop {
        let (scale, suffix) = UNITS[unit];
        let rounded = round_compact(value / scale);
        // 999_999 rounds up to 1000K, which reads as 1M
        if rounded.abs() >= 1000.0 && unit + 1 < UNITS.len() {
            unit += 1;
            continue;
        }
        let rounded = if rounded == 0.0 { 0.0 } else { rounded };
        return format!("{}{}", rounded, suffix);
    }
}

fn round_compact(value: f64) -> f64 {
    if value == 0.0 || value.abs() >= 100.0 {
        return value.round();
    }
    let decimals = 1 - value.abs().log10().floor() as i32;
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ============================================================================
// History
// ============================================================================

/// Current dataset snapshot plus the snapshots it replaced
#[derive(Debug, Default)]
pub struct DatasetHistory {
    current: Option<Snapshot>,
    undo: Vec<Snapshot>,
}

impl DatasetHistory {
    /// Start over with a freshly loaded dataset
    pub fn load(&mut self, rows: Vec<Row>) -> Snapshot {
        let snapshot = Arc::new(rows);
        self.current = Some(snapshot.clone());
        self.undo.clear();
        snapshot
    }

    pub fn current(&self) -> Option<Snapshot> {
        self.current.clone()
    }

    /// Swap in rows cleaned from `base`, keeping the previous snapshot for
    /// undo.
    ///
    /// `base` must still be current; otherwise the cleaned rows would drop
    /// whatever replaced it, and the call fails with [`WorkbenchError::Stale`].
    /// Returns the row counts before and after.
    pub fn replace(&mut self, base: &Snapshot, rows: Vec<Row>) -> Result<(usize, usize)> {
        let previous = self.current.as_ref().ok_or(WorkbenchError::NoDataset)?;
        if !Arc::ptr_eq(previous, base) {
            return Err(WorkbenchError::Stale);
        }
        let counts = (previous.len(), rows.len());
        let previous = previous.clone();
        self.undo.push(previous);
        self.current = Some(Arc::new(rows));
        Ok(counts)
    }

    /// Restore the snapshot replaced most recently
    pub fn undo(&mut self) -> Option<Snapshot> {
        let previous = self.undo.pop()?;
        self.current = Some(previous.clone());
        Some(previous)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }
}
