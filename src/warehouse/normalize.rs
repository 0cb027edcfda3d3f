//! Defensive normalization of generated rows for schema-strict sinks.
//!
//! Coercions are driven only by [`SinkCapabilities`]; there are no per-field
//! rules. Arrays become delimited text, objects become JSON text, and text
//! that is still too long for the sink is dropped to null and counted. The
//! table schema is rewritten to match: a coerced column becomes a single
//! valued string column.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use super::model::{ColumnType, TableSpec};
use super::{Row, SinkCapabilities};
use crate::error::{StageError, StageResult};

/// What happened to a column during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnAdjustment {
    /// Array values joined into delimited text.
    JoinedArray,
    /// Object values serialized to JSON text.
    SerializedObject,
    /// Some values could not be represented and were set to null.
    DroppedValues,
}

impl ColumnAdjustment {
    pub fn describe(&self) -> &'static str {
        match self {
            ColumnAdjustment::JoinedArray => "multi-valued values joined into delimited text",
            ColumnAdjustment::SerializedObject => "nested objects serialized to JSON text",
            ColumnAdjustment::DroppedValues => "unrepresentable values dropped to null",
        }
    }
}

/// Per-table record of coercions, used for logging and summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizationReport {
    pub table: String,
    pub adjustments: BTreeMap<String, BTreeSet<ColumnAdjustment>>,
    pub dropped_values: BTreeMap<String, usize>,
}

impl NormalizationReport {
    pub fn is_clean(&self) -> bool {
        self.adjustments.is_empty()
    }

    pub fn total_dropped(&self) -> usize {
        self.dropped_values.values().sum()
    }

    fn record(&mut self, column: &str, adjustment: ColumnAdjustment) {
        self.adjustments
            .entry(column.to_string())
            .or_default()
            .insert(adjustment);
    }
}

/// A table reshaped for a particular sink.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub spec: TableSpec,
    pub rows: Vec<Row>,
    pub report: NormalizationReport,
}

/// Reshapes `rows` (and `spec`) so that every value fits `caps`.
///
/// # Errors
///
/// `StageError::Normalization` when the table has no columns, or when rows
/// carried values but none of them survived normalization.
pub fn normalize_table(
    spec: &TableSpec,
    rows: Vec<Row>,
    caps: &SinkCapabilities,
) -> StageResult<NormalizedTable> {
    if spec.columns.is_empty() {
        return Err(StageError::Normalization {
            table: spec.name.clone(),
            reason: "table declares no columns".to_string(),
        });
    }

    let mut report = NormalizationReport {
        table: spec.name.clone(),
        ..Default::default()
    };
    let mut spec = spec.clone();

    if !caps.supports_arrays {
        for column in spec.columns.iter_mut().filter(|c| c.multi_valued) {
            column.multi_valued = false;
            column.data_type = ColumnType::String;
            report.record(&column.name, ColumnAdjustment::JoinedArray);
        }
    }

    let mut present = 0usize;
    let mut kept = 0usize;
    let mut coerced_columns: BTreeSet<String> = BTreeSet::new();

    let mut normalized = Vec::with_capacity(rows.len());
    for row in rows {
        let mut out = Row::new();
        for (column, value) in row {
            if value.is_null() {
                out.insert(column, value);
                continue;
            }
            present += 1;

            let (value, adjustment) = coerce(value, caps);
            if let Some(adjustment) = adjustment {
                report.record(&column, adjustment);
                coerced_columns.insert(column.clone());
            }

            let value = match value {
                Value::String(text) if exceeds(&text, caps) => {
                    report.record(&column, ColumnAdjustment::DroppedValues);
                    *report.dropped_values.entry(column.clone()).or_default() += 1;
                    Value::Null
                }
                other => {
                    kept += 1;
                    other
                }
            };
            out.insert(column, value);
        }
        normalized.push(out);
    }

    for column in spec.columns.iter_mut() {
        if coerced_columns.contains(&column.name) {
            column.data_type = ColumnType::String;
            column.multi_valued = false;
        }
    }

    if present > 0 && kept == 0 {
        return Err(StageError::Normalization {
            table: spec.name.clone(),
            reason: format!("none of {} values could be represented", present),
        });
    }

    if !report.is_clean() {
        tracing::debug!(
            table = %spec.name,
            columns = report.adjustments.len(),
            dropped = report.total_dropped(),
            "Normalized table for sink"
        );
    }

    Ok(NormalizedTable {
        spec,
        rows: normalized,
        report,
    })
}

fn coerce(value: Value, caps: &SinkCapabilities) -> (Value, Option<ColumnAdjustment>) {
    match value {
        Value::Array(items) if !caps.supports_arrays => {
            let joined = items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(&caps.array_delimiter);
            (Value::String(joined), Some(ColumnAdjustment::JoinedArray))
        }
        Value::Object(map) if !caps.supports_objects => (
            Value::String(Value::Object(map).to_string()),
            Some(ColumnAdjustment::SerializedObject),
        ),
        other => (other, None),
    }
}

fn exceeds(text: &str, caps: &SinkCapabilities) -> bool {
    caps.max_text_len
        .map(|max| text.chars().count() > max)
        .unwrap_or(false)
}
