//! Directory-backed warehouse.
//!
//! Each database is a directory under the root; each table is a
//! `<table>.jsonl` file plus its declaration in an in-memory catalog. Values
//! are checked strictly against the declared column types and the sink has no
//! array or object support, so rows must be normalized before loading.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;

use super::model::{ColumnType, TableSpec};
use super::{QueryCheck, Row, SinkCapabilities, SinkError, WarehouseLocation, WarehouseSink};
use crate::jobs::lock_unpoisoned;

/// Longest string value the local sink stores.
pub const MAX_TEXT_LEN: usize = 4096;

struct CatalogEntry {
    spec: TableSpec,
    rows_loaded: Option<usize>,
}

#[derive(Default)]
struct DatabaseCatalog {
    tables: HashMap<String, CatalogEntry>,
}

pub struct LocalWarehouse {
    root: PathBuf,
    catalog: Mutex<HashMap<String, DatabaseCatalog>>,
    table_refs: Regex,
    cte_names: Regex,
    from_functions: Regex,
}

impl LocalWarehouse {
    /// Creates a warehouse rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let table_refs = Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_.]*)")
            .map_err(|e| SinkError::Rejected(format!("invalid table pattern: {}", e)))?;
        let cte_names = Regex::new(r"(?i)(?:\bwith|,)\s*([A-Za-z_][A-Za-z0-9_]*)\s+as\s*\(")
            .map_err(|e| SinkError::Rejected(format!("invalid CTE pattern: {}", e)))?;
        let from_functions = Regex::new(r"(?i)\b(?:extract|substring|trim)\s*\([^()]*\)")
            .map_err(|e| SinkError::Rejected(format!("invalid function pattern: {}", e)))?;
        Ok(Self {
            root: root.into(),
            catalog: Mutex::new(HashMap::new()),
            table_refs,
            cte_names,
            from_functions,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_dir(&self, database: &str) -> Result<PathBuf, SinkError> {
        if database.is_empty()
            || !database
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SinkError::Rejected(format!(
                "invalid database name '{}'",
                database
            )));
        }
        Ok(self.root.join(database))
    }

    fn table_spec(&self, database: &str, table: &str) -> Result<TableSpec, SinkError> {
        let catalog = lock_unpoisoned(&self.catalog);
        let db = catalog
            .get(database)
            .ok_or_else(|| SinkError::NotProvisioned(database.to_string()))?;
        db.tables
            .get(table)
            .map(|entry| entry.spec.clone())
            .ok_or_else(|| SinkError::UnknownTable(table.to_string()))
    }

    /// Table names referenced by `FROM`/`JOIN`, minus CTE names, lowercased.
    fn referenced_tables(&self, sql: &str) -> Vec<String> {
        // EXTRACT(YEAR FROM col) and friends use FROM without naming a table.
        let sql = self.from_functions.replace_all(sql, "NULL");
        let sql = sql.as_ref();
        let ctes: BTreeSet<String> = self
            .cte_names
            .captures_iter(sql)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .collect();

        let mut tables = BTreeSet::new();
        for capture in self.table_refs.captures_iter(sql) {
            let Some(name) = capture.get(1) else {
                continue;
            };
            let unqualified = name
                .as_str()
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .to_lowercase();
            if !unqualified.is_empty() && !ctes.contains(&unqualified) {
                tables.insert(unqualified);
            }
        }
        tables.into_iter().collect()
    }
}

fn check_value(table: &str, column: &str, ty: ColumnType, value: &Value) -> Result<(), SinkError> {
    let mismatch = |reason: String| SinkError::TypeMismatch {
        table: table.to_string(),
        column: column.to_string(),
        reason,
    };

    let ok = match (ty, value) {
        (_, Value::Null) => true,
        (_, Value::Array(_)) => return Err(mismatch("arrays are not supported".to_string())),
        (_, Value::Object(_)) => return Err(mismatch("objects are not supported".to_string())),
        (ColumnType::String, Value::String(s)) => {
            if s.chars().count() > MAX_TEXT_LEN {
                return Err(mismatch(format!("text longer than {} characters", MAX_TEXT_LEN)));
            }
            true
        }
        (ColumnType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (ColumnType::Float, Value::Number(_)) => true,
        (ColumnType::Boolean, Value::Bool(_)) => true,
        (ColumnType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        (ColumnType::Timestamp, Value::String(s)) => {
            DateTime::parse_from_rfc3339(s).is_ok()
                || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(mismatch(format!("expected {}, got {}", ty, value)))
    }
}

#[async_trait]
impl WarehouseSink for LocalWarehouse {
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            supports_arrays: false,
            supports_objects: false,
            array_delimiter: "|".to_string(),
            max_text_len: Some(MAX_TEXT_LEN),
        }
    }

    async fn provision(&self, database: &str) -> Result<WarehouseLocation, SinkError> {
        let dir = self.database_dir(database)?;
        tokio::fs::create_dir_all(&dir).await?;
        lock_unpoisoned(&self.catalog)
            .entry(database.to_string())
            .or_default();
        tracing::debug!(database, location = %dir.display(), "Provisioned local database");
        Ok(WarehouseLocation {
            database: database.to_string(),
            location: dir.display().to_string(),
        })
    }

    async fn create_table(&self, database: &str, table: &TableSpec) -> Result<(), SinkError> {
        let dir = self.database_dir(database)?;
        {
            let mut catalog = lock_unpoisoned(&self.catalog);
            let db = catalog
                .get_mut(database)
                .ok_or_else(|| SinkError::NotProvisioned(database.to_string()))?;
            db.tables.insert(
                table.name.clone(),
                CatalogEntry {
                    spec: table.clone(),
                    rows_loaded: None,
                },
            );
        }
        let schema = serde_json::to_vec_pretty(table)?;
        tokio::fs::write(dir.join(format!("{}.schema.json", table.name)), schema).await?;
        Ok(())
    }

    async fn load_rows(
        &self,
        database: &str,
        table: &str,
        rows: &[Row],
    ) -> Result<usize, SinkError> {
        let dir = self.database_dir(database)?;
        let spec = self.table_spec(database, table)?;

        let mut body = String::new();
        for row in rows {
            for (column, value) in row {
                let declared = spec.column(column).ok_or_else(|| SinkError::TypeMismatch {
                    table: table.to_string(),
                    column: column.clone(),
                    reason: "column is not declared".to_string(),
                })?;
                check_value(table, column, declared.data_type, value)?;
            }
            body.push_str(&serde_json::to_string(row)?);
            body.push('\n');
        }

        tokio::fs::write(dir.join(format!("{}.jsonl", table)), body).await?;

        let mut catalog = lock_unpoisoned(&self.catalog);
        if let Some(entry) = catalog
            .get_mut(database)
            .and_then(|db| db.tables.get_mut(table))
        {
            entry.rows_loaded = Some(rows.len());
        }
        Ok(rows.len())
    }

    async fn loaded_tables(&self, database: &str) -> Result<Vec<String>, SinkError> {
        let catalog = lock_unpoisoned(&self.catalog);
        let db = catalog
            .get(database)
            .ok_or_else(|| SinkError::NotProvisioned(database.to_string()))?;
        let mut names: Vec<String> = db
            .tables
            .iter()
            .filter(|(_, entry)| entry.rows_loaded.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn validate_query(&self, database: &str, sql: &str) -> Result<QueryCheck, SinkError> {
        let loaded: BTreeSet<String> = self
            .loaded_tables(database)
            .await?
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();

        let trimmed = sql.trim_start().to_lowercase();
        if !(trimmed.starts_with("select") || trimmed.starts_with("with")) {
            return Ok(QueryCheck {
                valid: false,
                referenced_tables: Vec::new(),
                missing_tables: Vec::new(),
                reason: Some("only SELECT queries are allowed".to_string()),
            });
        }

        let referenced = self.referenced_tables(sql);
        let missing: Vec<String> = referenced
            .iter()
            .filter(|t| !loaded.contains(*t))
            .cloned()
            .collect();

        let reason = if referenced.is_empty() {
            Some("query references no tables".to_string())
        } else if !missing.is_empty() {
            Some(format!("unknown tables: {}", missing.join(", ")))
        } else {
            None
        };

        Ok(QueryCheck {
            valid: reason.is_none(),
            referenced_tables: referenced,
            missing_tables: missing,
            reason,
        })
    }

    async fn write_document(
        &self,
        database: &str,
        name: &str,
        contents: &str,
    ) -> Result<String, SinkError> {
        let dir = self.database_dir(database)?;
        if name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(SinkError::Rejected(format!("invalid document name '{}'", name)));
        }
        let path = dir.join(name);
        tokio::fs::write(&path, contents).await?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::model::ColumnSpec;
    use serde_json::json;
    use tempfile::TempDir;

    fn orders() -> TableSpec {
        TableSpec {
            name: "orders".to_string(),
            description: "Orders".to_string(),
            columns: vec![
                ColumnSpec::new("order_id", ColumnType::Integer),
                ColumnSpec::new("placed_on", ColumnType::Date),
                ColumnSpec::new("total", ColumnType::Float),
            ],
            row_count: 2,
        }
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn provisioned() -> (TempDir, LocalWarehouse) {
        let dir = TempDir::new().unwrap();
        let warehouse = LocalWarehouse::new(dir.path()).unwrap();
        warehouse.provision("demo").await.unwrap();
        warehouse.create_table("demo", &orders()).await.unwrap();
        (dir, warehouse)
    }

    #[tokio::test]
    async fn test_load_writes_jsonl() {
        let (dir, warehouse) = provisioned().await;
        let rows = vec![
            row(json!({"order_id": 1, "placed_on": "2024-01-02", "total": 9.5})),
            row(json!({"order_id": 2, "placed_on": null, "total": 3})),
        ];
        assert_eq!(warehouse.load_rows("demo", "orders", &rows).await.unwrap(), 2);

        let text = std::fs::read_to_string(dir.path().join("demo/orders.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(
            warehouse.loaded_tables("demo").await.unwrap(),
            vec!["orders".to_string()]
        );
    }

    #[tokio::test]
    async fn test_arrays_rejected() {
        let (_dir, warehouse) = provisioned().await;
        let rows = vec![row(json!({"order_id": [1, 2]}))];
        let err = warehouse.load_rows("demo", "orders", &rows).await.unwrap_err();
        assert!(matches!(err, SinkError::TypeMismatch { column, .. } if column == "order_id"));
    }

    #[tokio::test]
    async fn test_type_and_undeclared_column_rejected() {
        let (_dir, warehouse) = provisioned().await;
        let bad_date = vec![row(json!({"placed_on": "yesterday"}))];
        assert!(warehouse.load_rows("demo", "orders", &bad_date).await.is_err());

        let extra = vec![row(json!({"coupon": "X"}))];
        assert!(warehouse.load_rows("demo", "orders", &extra).await.is_err());
        assert!(warehouse.loaded_tables("demo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unprovisioned_database() {
        let dir = TempDir::new().unwrap();
        let warehouse = LocalWarehouse::new(dir.path()).unwrap();
        let err = warehouse.create_table("nope", &orders()).await.unwrap_err();
        assert!(matches!(err, SinkError::NotProvisioned(_)));
        assert!(warehouse.provision("../escape").await.is_err());
    }

    #[tokio::test]
    async fn test_validate_query() {
        let (_dir, warehouse) = provisioned().await;
        warehouse
            .load_rows("demo", "orders", &[row(json!({"order_id": 1}))])
            .await
            .unwrap();

        let ok = warehouse
            .validate_query("demo", "SELECT SUM(total) FROM demo.orders o")
            .await
            .unwrap();
        assert!(ok.valid);
        assert_eq!(ok.referenced_tables, vec!["orders".to_string()]);

        let missing = warehouse
            .validate_query(
                "demo",
                "SELECT * FROM orders o JOIN customers c ON o.id = c.id",
            )
            .await
            .unwrap();
        assert!(!missing.valid);
        assert_eq!(missing.missing_tables, vec!["customers".to_string()]);

        let cte = warehouse
            .validate_query(
                "demo",
                "WITH recent AS (SELECT * FROM orders) SELECT COUNT(*) FROM recent",
            )
            .await
            .unwrap();
        assert!(cte.valid, "{:?}", cte.reason);

        let extract = warehouse
            .validate_query(
                "demo",
                "SELECT EXTRACT(YEAR FROM placed_on) AS y, COUNT(*) FROM orders GROUP BY 1",
            )
            .await
            .unwrap();
        assert_eq!(extract.referenced_tables, vec!["orders".to_string()]);

        let write = warehouse
            .validate_query("demo", "DELETE FROM orders")
            .await
            .unwrap();
        assert!(!write.valid);
    }

    #[tokio::test]
    async fn test_write_document() {
        let (dir, warehouse) = provisioned().await;
        let location = warehouse
            .write_document("demo", "README.md", "# Demo")
            .await
            .unwrap();
        assert!(location.ends_with("README.md"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("demo/README.md")).unwrap(),
            "# Demo"
        );
        assert!(warehouse
            .write_document("demo", "../x.md", "nope")
            .await
            .is_err());
    }
}
