//! CSV loading into row records plus a column-type schema.
//!
//! Column types use the dtype names the generated pandas code will see once the
//! rows are rebuilt into a DataFrame (`int64`, `float64`, `bool`, `object`).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::{Number, Value};
use tracing::debug;

use crate::core::request::{Row, Schema};

/// Parsed tabular input.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub rows: Vec<Row>,
    pub schema: Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

impl ColumnKind {
    fn dtype(self, has_missing: bool) -> &'static str {
        match self {
            // Missing values force integer columns to floats, as pandas does.
            Self::Int if has_missing => "float64",
            Self::Int => "int64",
            Self::Float => "float64",
            Self::Bool if has_missing => "object",
            Self::Bool => "bool",
            Self::Text => "object",
        }
    }
}

pub fn load_csv(path: &Path) -> Result<Dataset> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    parse_csv(file).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_csv<R: Read>(reader: R) -> Result<Dataset> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .context("read csv header")?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(anyhow!("csv has no header row"));
    }

    let mut cells: Vec<Vec<String>> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("read csv record {}", line + 1))?;
        cells.push(record.iter().map(str::to_string).collect());
    }

    let kinds: Vec<(ColumnKind, bool)> = (0..headers.len())
        .map(|col| infer_column(cells.iter().map(|row| row[col].as_str())))
        .collect();

    let schema: Schema = headers
        .iter()
        .zip(&kinds)
        .map(|(name, (kind, missing))| (name.clone(), kind.dtype(*missing)))
        .collect();

    let rows = cells
        .iter()
        .map(|row| {
            headers
                .iter()
                .zip(row)
                .zip(&kinds)
                .map(|((name, raw), (kind, _))| (name.clone(), to_value(raw, *kind)))
                .collect::<Row>()
        })
        .collect::<Vec<_>>();

    debug!(
        rows = rows.len(),
        columns = schema.len(),
        "parsed csv dataset"
    );
    Ok(Dataset { rows, schema })
}

fn infer_column<'a>(values: impl Iterator<Item = &'a str>) -> (ColumnKind, bool) {
    let mut kind: Option<ColumnKind> = None;
    let mut missing = false;
    for raw in values {
        if raw.is_empty() {
            missing = true;
            continue;
        }
        let cell = classify(raw);
        kind = Some(match (kind, cell) {
            (None, cell) => cell,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => ColumnKind::Text,
        });
    }
    // A column with no values at all reads as all-NaN floats.
    (kind.unwrap_or(ColumnKind::Float), missing)
}

fn classify(raw: &str) -> ColumnKind {
    if raw.parse::<i64>().is_ok() {
        ColumnKind::Int
    } else if raw.parse::<f64>().is_ok_and(f64::is_finite) {
        ColumnKind::Float
    } else if parse_bool(raw).is_some() {
        ColumnKind::Bool
    } else {
        ColumnKind::Text
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

fn to_value(raw: &str, kind: ColumnKind) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match kind {
        ColumnKind::Int => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        ColumnKind::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnKind::Bool => parse_bool(raw)
            .map(Value::Bool)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        ColumnKind::Text => Value::String(raw.to_string()),
    }
}
