use crate::error::{Result, SignalError};
use crate::schema::{ColumnType, NumericStats, ParsedFile, RawRecord};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestOptions {
    /// Rows parsed before the file is cut off.
    pub max_rows: usize,
    /// Files above this size are skipped with a warning.
    pub max_size_bytes: u64,
    /// Records kept in memory for the signal pipeline.
    pub retained_rows: usize,
    pub sample_rows: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_rows: 25_000,
            max_size_bytes: 5 * 1024 * 1024,
            retained_rows: 1000,
            sample_rows: 3,
        }
    }
}

/// Dynamic typing for a raw cell: empty → null, `true`/`false` → bool,
/// numeric text → number, anything else stays a string.
pub fn type_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match raw {
        "true" | "TRUE" | "True" => return Value::Bool(true),
        "false" | "FALSE" | "False" => return Value::Bool(false),
        _ => {}
    }
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
    {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

fn infer_type(value: &Value) -> ColumnType {
    match value {
        Value::Number(_) => ColumnType::Number,
        Value::String(s) => {
            let bytes = s.as_bytes();
            let looks_like_date = bytes.len() >= 10
                && bytes[..4].iter().all(u8::is_ascii_digit)
                && bytes[4] == b'-'
                && bytes[5..7].iter().all(u8::is_ascii_digit)
                && bytes[7] == b'-'
                && bytes[8..10].iter().all(u8::is_ascii_digit);
            if looks_like_date {
                ColumnType::Date
            } else {
                ColumnType::String
            }
        }
        _ => ColumnType::Unknown,
    }
}

struct FileProfile {
    column_types: BTreeMap<String, ColumnType>,
    numeric_stats: BTreeMap<String, NumericStats>,
    skus: BTreeSet<String>,
}

impl FileProfile {
    fn new() -> Self {
        Self {
            column_types: BTreeMap::new(),
            numeric_stats: BTreeMap::new(),
            skus: BTreeSet::new(),
        }
    }

    fn observe(&mut self, record: &RawRecord) {
        for (column, value) in record {
            let observed = infer_type(value);
            self.column_types
                .entry(column.clone())
                .and_modify(|known| {
                    if *known != observed {
                        *known = ColumnType::String;
                    }
                })
                .or_insert(observed);

            if let Some(n) = value.as_f64() {
                self.numeric_stats
                    .entry(column.clone())
                    .and_modify(|stats| {
                        stats.min = stats.min.min(n);
                        stats.max = stats.max.max(n);
                    })
                    .or_insert(NumericStats { min: n, max: n });
            }

            if column.eq_ignore_ascii_case("sku") {
                if let Value::String(sku) = value {
                    self.skus.insert(sku.clone());
                }
            }
        }
    }
}

/// Parses CSV text with a header row into a [`ParsedFile`].
pub fn parse_csv<R: Read>(
    name: &str,
    reader: R,
    size_bytes: u64,
    options: &IngestOptions,
) -> Result<ParsedFile> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let csv_error = |source: csv::Error| SignalError::Csv {
        file: name.to_string(),
        source,
    };

    let columns: Vec<String> = csv_reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut parsed = ParsedFile {
        name: name.to_string(),
        size_bytes,
        columns: columns.clone(),
        ..Default::default()
    };
    let mut profile = FileProfile::new();

    for result in csv_reader.records() {
        let record = result.map_err(csv_error)?;
        let row: RawRecord = columns
            .iter()
            .enumerate()
            .map(|(i, column)| (column.clone(), record.get(i).map_or(Value::Null, type_cell)))
            .collect();

        profile.observe(&row);
        if parsed.row_count < options.sample_rows {
            parsed.sample_rows.push(row.clone());
        }
        if parsed.row_count < options.retained_rows {
            parsed.retained_rows.push(row);
        }
        parsed.row_count += 1;

        if parsed.row_count >= options.max_rows {
            warn!("{}: row cap of {} reached", name, options.max_rows);
            parsed.truncated = true;
            parsed
                .warnings
                .push(format!("Row cap reached at {}; remaining rows ignored.", options.max_rows));
            break;
        }
    }

    parsed.column_types = profile.column_types;
    parsed.numeric_stats = profile.numeric_stats;
    parsed.distinct_sku = (!profile.skus.is_empty()).then_some(profile.skus.len());

    debug!(
        "Parsed {}: {} rows, {} columns, {} retained",
        name,
        parsed.row_count,
        parsed.columns.len(),
        parsed.retained_rows.len()
    );
    Ok(parsed)
}

/// Parses an uploaded file's bytes. Oversized uploads are not an error: they
/// come back empty with a warning so the rest of the upload batch proceeds.
pub fn parse_csv_bytes(name: &str, bytes: &[u8], options: &IngestOptions) -> Result<ParsedFile> {
    let size_bytes = bytes.len() as u64;
    if size_bytes > options.max_size_bytes {
        warn!("{}: skipped, {} bytes exceeds limit", name, size_bytes);
        return Ok(oversized(name, size_bytes, options));
    }
    parse_csv(name, bytes, size_bytes, options)
}

pub fn parse_csv_file(path: &Path, options: &IngestOptions) -> Result<ParsedFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SignalError::InvalidPath(path.display().to_string()))?;
    let size_bytes = std::fs::metadata(path)?.len();
    if size_bytes > options.max_size_bytes {
        warn!("{}: skipped, {} bytes exceeds limit", name, size_bytes);
        return Ok(oversized(name, size_bytes, options));
    }
    let file = std::fs::File::open(path)?;
    parse_csv(name, file, size_bytes, options)
}

fn oversized(name: &str, size_bytes: u64, options: &IngestOptions) -> ParsedFile {
    let mb = |bytes: u64| bytes as f64 / 1024.0 / 1024.0;
    ParsedFile {
        name: name.to_string(),
        size_bytes,
        warnings: vec![format!(
            "File skipped: exceeds {:.1}MB limit ({:.2}MB).",
            mb(options.max_size_bytes),
            mb(size_bytes)
        )],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SALES_CSV: &str = "\
date,sku,units,revenue
2024-01-01,SKU1,3,29.97
2024-01-02,SKU2,,15
2024-01-02,SKU1,abc,true

2024-01-03,SKU3,1,9.99
";

    #[test]
    fn test_parse_sales_csv() {
        let parsed =
            parse_csv_bytes("sales_daily.csv", SALES_CSV.as_bytes(), &IngestOptions::default())
                .unwrap();
        assert_eq!(parsed.row_count, 4);
        assert_eq!(parsed.columns, vec!["date", "sku", "units", "revenue"]);
        assert_eq!(parsed.sample_rows.len(), 3);
        assert_eq!(parsed.retained_rows.len(), 4);
        assert_eq!(parsed.distinct_sku, Some(3));
        assert!(!parsed.truncated);

        let first = &parsed.retained_rows[0];
        assert_eq!(first["units"], json!(3));
        assert_eq!(first["revenue"], json!(29.97));
        assert_eq!(parsed.retained_rows[1]["units"], Value::Null);

        assert_eq!(parsed.column_types["date"], ColumnType::Date);
        assert_eq!(parsed.column_types["sku"], ColumnType::String);
        // Mixed numeric, empty and text cells widen to string.
        assert_eq!(parsed.column_types["units"], ColumnType::String);
        assert_eq!(parsed.numeric_stats["units"].min, 1.0);
        assert_eq!(parsed.numeric_stats["units"].max, 3.0);
    }

    #[test]
    fn test_row_cap_truncates() {
        let options = IngestOptions {
            max_rows: 2,
            retained_rows: 1,
            ..Default::default()
        };
        let parsed = parse_csv_bytes("sales_daily.csv", SALES_CSV.as_bytes(), &options).unwrap();
        assert_eq!(parsed.row_count, 2);
        assert!(parsed.truncated);
        assert_eq!(parsed.retained_rows.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_oversized_upload_is_skipped_with_warning() {
        let options = IngestOptions {
            max_size_bytes: 10,
            ..Default::default()
        };
        let parsed = parse_csv_bytes("sales_daily.csv", SALES_CSV.as_bytes(), &options).unwrap();
        assert_eq!(parsed.row_count, 0);
        assert!(parsed.retained_rows.is_empty());
        assert!(parsed.warnings[0].starts_with("File skipped"));
    }

    #[test]
    fn test_type_cell() {
        assert_eq!(type_cell(""), Value::Null);
        assert_eq!(type_cell("42"), json!(42));
        assert_eq!(type_cell("-1.5"), json!(-1.5));
        assert_eq!(type_cell("TRUE"), json!(true));
        assert_eq!(type_cell("SKU-1"), json!("SKU-1"));
        assert_eq!(type_cell("NaN"), json!("NaN"));
    }
}
