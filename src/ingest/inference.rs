//! Display-only column type guesses
//!
//! Tables are always created with `TEXT` columns. These guesses only help a
//! client decide how to render values (right-align numbers, format dates);
//! they never influence what is stored.

use chrono::NaiveDate;
use serde_json::Value;

use crate::engine::TextRow;

/// Number of leading rows examined per column.
pub const INFERENCE_SAMPLE_ROWS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayType {
    Integer,
    Real,
    Date,
    Text,
}

impl DisplayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayType::Integer => "INTEGER",
            DisplayType::Real => "REAL",
            DisplayType::Date => "DATE",
            DisplayType::Text => "TEXT",
        }
    }
}

fn is_integer(value: &str) -> bool {
    value.parse::<i64>().is_ok()
}

fn is_number(value: &str) -> bool {
    value.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

fn is_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Narrowest type every non-empty value fits; `Text` when there are none.
pub fn infer_column<'a>(values: impl IntoIterator<Item = &'a str>) -> DisplayType {
    let values: Vec<&str> = values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if values.is_empty() {
        DisplayType::Text
    } else if values.iter().all(|v| is_integer(v)) {
        DisplayType::Integer
    } else if values.iter().all(|v| is_number(v)) {
        DisplayType::Real
    } else if values.iter().all(|v| is_date(v)) {
        DisplayType::Date
    } else {
        DisplayType::Text
    }
}

/// `{column: type}` for every column, from the first [`INFERENCE_SAMPLE_ROWS`] rows.
pub fn infer_display_types(headers: &[String], rows: &[TextRow]) -> serde_json::Map<String, Value> {
    let sample = &rows[..rows.len().min(INFERENCE_SAMPLE_ROWS)];

    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values = sample
                .iter()
                .filter_map(|row| row.get(idx).and_then(|v| v.as_deref()));
            (
                name.clone(),
                Value::String(infer_column(values).as_str().to_string()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_column() {
        assert_eq!(infer_column(["1", "-2", " 30 "]), DisplayType::Integer);
        assert_eq!(infer_column(["1", "2.5"]), DisplayType::Real);
        assert_eq!(infer_column(["2024-01-05", "2024-02-29"]), DisplayType::Date);
        assert_eq!(infer_column(["2024-01-05", "soon"]), DisplayType::Text);
        assert_eq!(infer_column(["", "  "]), DisplayType::Text);
        assert_eq!(infer_column(["NaN"]), DisplayType::Text);
    }

    #[test]
    fn test_infer_display_types_skips_nulls() {
        let headers = vec!["id".to_string(), "when".to_string(), "note".to_string()];
        let rows = vec![
            vec![Some("1".to_string()), Some("2024-03-15".to_string()), None],
            vec![Some("2".to_string()), None, Some("hello".to_string())],
        ];

        let types = infer_display_types(&headers, &rows);
        assert_eq!(types["id"], "INTEGER");
        assert_eq!(types["when"], "DATE");
        assert_eq!(types["note"], "TEXT");
    }

    #[test]
    fn test_only_leading_rows_are_sampled() {
        let headers = vec!["v".to_string()];
        let mut rows: Vec<TextRow> = (0..INFERENCE_SAMPLE_ROWS)
            .map(|i| vec![Some(i.to_string())])
            .collect();
        rows.push(vec![Some("not a number".to_string())]);

        assert_eq!(infer_display_types(&headers, &rows)["v"], "INTEGER");
    }
}
