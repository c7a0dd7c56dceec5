//! Delimited text to header names and text rows

use std::collections::HashSet;

use csv::ReaderBuilder;

use crate::engine::TextRow;
use crate::{Result, TabdbError};

/// Row count above which an import carries a "large dataset" warning.
pub const LARGE_DATASET_ROWS: usize = 100_000;

const DETECTABLE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCsv {
    /// Column names, unique ignoring ASCII case
    pub headers: Vec<String>,
    /// Data rows, each exactly `headers.len()` wide; empty fields are `None`
    pub rows: Vec<TextRow>,
    pub warnings: Vec<String>,
}

/// Turn the client's `separator` into a single delimiter byte.
///
/// An empty separator asks for detection from the first line.
pub fn resolve_delimiter(separator: &str, text: &str) -> Result<u8> {
    match separator {
        "" => Ok(detect_delimiter(text)),
        "\\t" | "tab" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() && !matches!(s, "\"" | "\n" | "\r") => {
            Ok(s.as_bytes()[0])
        }
        other => Err(TabdbError::ParseError(format!(
            "unsupported separator {:?}: expected a single ASCII character",
            other
        ))),
    }
}

/// Most frequent candidate delimiter in the first non-blank line, comma on ties.
fn detect_delimiter(text: &str) -> u8 {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut best = (b',', 0usize);
    for candidate in DETECTABLE_DELIMITERS {
        let count = first_line.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// Parse delimited text.
///
/// With `has_headers` the first record names the columns; otherwise columns
/// are named `Column_1..Column_N` after the widest record.
///
/// # Errors
///
/// `TabdbError::ParseError` when the text is not valid delimited data, has
/// no columns, or has no data rows.
pub fn parse_csv(bytes: &[u8], separator: &str, has_headers: bool) -> Result<ParsedCsv> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let delimiter = resolve_delimiter(separator, text)?;

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| TabdbError::ParseError(e.to_string()))?;
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        records.push(record.iter().map(str::to_string).collect());
    }

    let mut warnings = Vec::new();
    let raw_headers = if has_headers {
        if records.is_empty() {
            Vec::new()
        } else {
            records.remove(0)
        }
    } else {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        (1..=width).map(|i| format!("Column_{}", i)).collect()
    };

    if raw_headers.is_empty() {
        return Err(TabdbError::ParseError(
            "CSV is empty or could not be parsed: no columns found".to_string(),
        ));
    }
    if records.is_empty() {
        return Err(TabdbError::ParseError(
            "CSV is empty or could not be parsed: no data rows found".to_string(),
        ));
    }

    let headers = unique_headers(raw_headers, &mut warnings);
    let width = headers.len();

    let mut ragged = 0usize;
    let rows: Vec<TextRow> = records
        .into_iter()
        .map(|record| {
            if record.len() != width {
                ragged += 1;
            }
            let mut row: TextRow = record
                .into_iter()
                .take(width)
                .map(|field| if field.is_empty() { None } else { Some(field) })
                .collect();
            row.resize(width, None);
            row
        })
        .collect();

    if ragged > 0 && has_headers {
        warnings.push(format!(
            "{} row(s) did not have {} fields; missing values were stored as NULL and extra values dropped",
            ragged, width
        ));
    }
    if rows.len() > LARGE_DATASET_ROWS {
        warnings.push(format!(
            "Large dataset detected ({} rows). Processing may take some time.",
            rows.len()
        ));
    }

    Ok(ParsedCsv {
        headers,
        rows,
        warnings,
    })
}

/// Fill blank names positionally and suffix duplicates (`name_2`, `name_3`, ...).
///
/// Engines compare identifiers case-insensitively, so `Name` and `name`
/// count as duplicates too.
fn unique_headers(raw: Vec<String>, warnings: &mut Vec<String>) -> Vec<String> {
    let named: Vec<String> = raw
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            if name.trim().is_empty() {
                format!("Column_{}", i + 1)
            } else {
                name
            }
        })
        .collect();

    let originals: HashSet<String> = named.iter().map(|n| n.to_lowercase()).collect();
    let mut used: HashSet<String> = HashSet::new();
    let mut headers = Vec::with_capacity(named.len());

    for name in named {
        if used.insert(name.to_lowercase()) {
            headers.push(name);
            continue;
        }

        let mut suffix = 2;
        let renamed = loop {
            let candidate = format!("{}_{}", name, suffix);
            let key = candidate.to_lowercase();
            if !originals.contains(&key) && !used.contains(&key) {
                break candidate;
            }
            suffix += 1;
        };
        used.insert(renamed.to_lowercase());
        warnings.push(format!(
            "Duplicate column header '{}' renamed to '{}'",
            name, renamed
        ));
        headers.push(renamed);
    }

    headers
}
