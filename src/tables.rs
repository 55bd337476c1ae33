//! Post-hoc extraction of GitHub-style markdown tables from a finished model
//! response, plus removal of the end-of-stream trailer.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const END_MARKER: &str = "@@END@@";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\|?\s*:?-+:?\s*(\|\s*:?-+:?\s*)*\|?$").expect("static regex")
    })
}

fn is_table_row(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('|') && line.ends_with('|') && line.len() > 1
}

fn split_cells(line: &str) -> Vec<String> {
    let line = line.trim();
    let inner = line.strip_prefix('|').unwrap_or(line);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Every table made of a header row, a separator row and any number of body
/// rows. Body rows are padded or cut to the header width.
pub fn extract_tables(text: &str) -> Vec<ParsedTable> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut i = 0;

    while i + 1 < lines.len() {
        if !is_table_row(lines[i]) || !separator_re().is_match(lines[i + 1].trim()) {
            i += 1;
            continue;
        }
        let headers = split_cells(lines[i]);
        let width = headers.len();
        i += 2;

        let mut rows = Vec::new();
        while i < lines.len() && is_table_row(lines[i]) {
            let mut cells = split_cells(lines[i]);
            cells.resize(width, String::new());
            rows.push(cells);
            i += 1;
        }
        tables.push(ParsedTable { headers, rows });
    }
    tables
}

/// Text with every extracted table block removed, so a caller rendering the
/// tables separately does not show them twice.
pub fn strip_tables(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let starts_table = i + 1 < lines.len()
            && is_table_row(lines[i])
            && separator_re().is_match(lines[i + 1].trim());
        if starts_table {
            i += 2;
            while i < lines.len() && is_table_row(lines[i]) {
                i += 1;
            }
            continue;
        }
        kept.push(lines[i]);
        i += 1;
    }
    kept.join("\n")
}

/// Drops the `@@END@@` trailer and anything after it.
pub fn strip_trailer(text: &str) -> &str {
    match text.find(END_MARKER) {
        Some(pos) => text[..pos].trim_end(),
        None => text,
    }
}

/// Provider name carried in a `@@END@@{"provider":"..."}` trailer.
pub fn trailer_provider(text: &str) -> Option<String> {
    let start = text.find(END_MARKER)? + END_MARKER.len();
    let payload: serde_json::Value = serde_json::from_str(text[start..].trim()).ok()?;
    payload
        .get("provider")
        .and_then(|p| p.as_str())
        .map(str::to_string)
}
