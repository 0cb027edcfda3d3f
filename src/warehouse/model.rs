//! The demo data model: tables, typed columns and target row counts.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageResult};

/// Upper bound on generated rows per table.
pub const MAX_ROWS_PER_TABLE: usize = 10_000;

/// Scalar column types understood by every sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
}

impl ColumnType {
    /// Parses a type name, accepting common SQL spellings.
    pub fn parse(name: &str) -> Option<Self> {
        let lowered = name.trim().to_lowercase();
        let base = lowered.split('(').next().unwrap_or_default().trim();
        match base {
            "string" | "text" | "varchar" | "char" | "str" => Some(ColumnType::String),
            "integer" | "int" | "bigint" | "smallint" | "long" => Some(ColumnType::Integer),
            "float" | "double" | "decimal" | "numeric" | "real" => Some(ColumnType::Float),
            "boolean" | "bool" => Some(ColumnType::Boolean),
            "date" => Some(ColumnType::Date),
            "timestamp" | "datetime" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
    /// The column holds a list of values rather than one.
    #[serde(default)]
    pub multi_valued: bool,
    /// `table.column` this column points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    /// Example values synthetic data draws from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            multi_valued: false,
            references: None,
            sample_values: Vec::new(),
        }
    }

    pub fn multi(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.references = Some(target.into());
        self
    }

    pub fn samples<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.sample_values = values.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnSpec>,
    pub row_count: usize,
}

impl TableSpec {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    pub tables: Vec<TableSpec>,
}

impl DataModel {
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Checks structural rules every sink relies on.
    ///
    /// # Errors
    ///
    /// `InvalidInput` on an empty schema, a duplicate or malformed name, a
    /// table without columns, an out-of-range row count, or a dangling
    /// reference.
    pub fn validate(&self) -> StageResult<()> {
        if self.tables.is_empty() {
            return Err(StageError::invalid("data_model", "schema has no tables"));
        }

        let mut table_names = HashSet::new();
        for table in &self.tables {
            check_identifier("table", &table.name)?;
            if !table_names.insert(table.name.to_lowercase()) {
                return Err(StageError::invalid(
                    "data_model",
                    format!("duplicate table name '{}'", table.name),
                ));
            }
            if table.columns.is_empty() {
                return Err(StageError::invalid(
                    "data_model",
                    format!("table '{}' has no columns", table.name),
                ));
            }
            if table.row_count == 0 || table.row_count > MAX_ROWS_PER_TABLE {
                return Err(StageError::invalid(
                    "data_model",
                    format!(
                        "table '{}' row_count {} is outside 1..={}",
                        table.name, table.row_count, MAX_ROWS_PER_TABLE
                    ),
                ));
            }

            let mut column_names = HashSet::new();
            for column in &table.columns {
                check_identifier("column", &column.name)?;
                if !column_names.insert(column.name.to_lowercase()) {
                    return Err(StageError::invalid(
                        "data_model",
                        format!(
                            "duplicate column '{}' in table '{}'",
                            column.name, table.name
                        ),
                    ));
                }
            }
        }

        for table in &self.tables {
            for column in &table.columns {
                let Some(target) = &column.references else {
                    continue;
                };
                let resolved = target
                    .split_once('.')
                    .and_then(|(t, c)| self.table(t).and_then(|t| t.column(c)));
                if resolved.is_none() {
                    return Err(StageError::invalid(
                        "data_model",
                        format!(
                            "column '{}.{}' references unknown '{}'",
                            table.name, column.name, target
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn check_identifier(kind: &str, name: &str) -> StageResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StageError::invalid(
            "data_model",
            format!("invalid {} name '{}'", kind, name),
        ))
    }
}
