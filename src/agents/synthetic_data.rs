//! Synthetic data stage: deterministic rows for every table in the model.
//!
//! Each table gets its own `ChaCha8Rng` seeded from a SHA-256 of the job's
//! source URL and the table name, so a given site always yields the same
//! warehouse contents and tables do not depend on generation order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::keys;
use crate::error::StageResult;
use crate::pipeline::{PipelineState, Stage, StageContext, StageOutput};
use crate::warehouse::{ColumnSpec, ColumnType, DataModel, Row, TableSpec};

/// Generated rows keyed by table name. Stored under `synthetic_data`.
pub type SyntheticTables = BTreeMap<String, Vec<Row>>;

const FIRST_NAMES: [&str; 10] = [
    "Alice", "Bruno", "Chioma", "Dmitri", "Elena", "Farah", "Goran", "Hana", "Ines", "Jun",
];
const LAST_NAMES: [&str; 10] = [
    "Smith", "Garcia", "Nguyen", "Okafor", "Rossi", "Tanaka", "Weber", "Kaur", "Silva", "Berg",
];
const STATUSES: [&str; 4] = ["active", "pending", "completed", "cancelled"];
const CITIES: [&str; 8] = [
    "Austin", "Berlin", "Lagos", "Lisbon", "Melbourne", "Seoul", "Toronto", "Valencia",
];

/// Most values a multi-valued column holds.
const MAX_LIST_LEN: usize = 3;

/// Days covered by generated dates, starting 2023-01-01.
const DATE_SPAN_DAYS: i64 = 730;

#[derive(Debug, Default)]
pub struct SyntheticDataAgent;

impl SyntheticDataAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for SyntheticDataAgent {
    fn name(&self) -> &'static str {
        "synthetic_data"
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> StageResult<StageOutput> {
        let model: DataModel = state.require(keys::DATA_MODEL)?;
        let source_url: String = state.optional(keys::SOURCE_URL)?.unwrap_or_default();

        let mut tables = SyntheticTables::new();
        let mut total_rows = 0;
        for (i, table) in model.tables.iter().enumerate() {
            let rows = generate_table(&model, table, &source_url);
            total_rows += rows.len();
            ctx.info(format!("Generated {} rows for {}", rows.len(), table.name));
            tables.insert(table.name.clone(), rows);
            ctx.report_progress((i + 1) as f64 / model.tables.len() as f64);
        }

        ctx.success(format!(
            "Generated {} rows across {} table(s)",
            total_rows,
            tables.len()
        ));

        let mut partial = PipelineState::new();
        partial.put(keys::SYNTHETIC_DATA, &tables)?;
        Ok(StageOutput::new(partial).with_summary(json!({
            "tables": tables.len(),
            "rows": total_rows,
        })))
    }
}

/// Seed for one table's generator.
pub fn table_seed(source_url: &str, table: &str) -> u64 {
    let digest = Sha256::digest(format!("{}\n{}", source_url, table).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Generates `table.row_count` rows.
///
/// The first column is a 1-based sequential key when it is an integer whose
/// name ends in `id`. Integer columns that reference another table draw from
/// that table's key range.
pub fn generate_table(model: &DataModel, table: &TableSpec, source_url: &str) -> Vec<Row> {
    let mut rng = ChaCha8Rng::seed_from_u64(table_seed(source_url, &table.name));
    let key_column = table
        .columns
        .first()
        .filter(|c| c.data_type == ColumnType::Integer && c.name.to_lowercase().ends_with("id"))
        .map(|c| c.name.as_str());

    let mut rows = Vec::with_capacity(table.row_count);
    for index in 0..table.row_count {
        let mut row = Row::new();
        for column in &table.columns {
            let value = if Some(column.name.as_str()) == key_column {
                json!(index + 1)
            } else if column.multi_valued {
                let len = rng.random_range(1..=MAX_LIST_LEN);
                Value::Array(
                    (0..len)
                        .map(|_| scalar(&mut rng, model, table, column, index))
                        .collect(),
                )
            } else {
                scalar(&mut rng, model, table, column, index)
            };
            row.insert(column.name.clone(), value);
        }
        rows.push(row);
    }
    rows
}

fn scalar(
    rng: &mut ChaCha8Rng,
    model: &DataModel,
    table: &TableSpec,
    column: &ColumnSpec,
    index: usize,
) -> Value {
    let name = column.name.to_lowercase();

    if column.data_type == ColumnType::Integer {
        if let Some(parent_rows) = referenced_row_count(model, column) {
            return json!(rng.random_range(1..=parent_rows.max(1)));
        }
    }

    match column.data_type {
        ColumnType::String => {
            if !column.sample_values.is_empty() {
                let pick = rng.random_range(0..column.sample_values.len());
                return json!(column.sample_values[pick]);
            }
            json!(text_value(rng, table, &name, index))
        }
        ColumnType::Integer => {
            let value: i64 = if contains_any(&name, &["quantity", "qty", "count", "units"]) {
                rng.random_range(1..=10)
            } else if name.contains("age") {
                rng.random_range(18..=80)
            } else if name.contains("year") {
                rng.random_range(2015..=2025)
            } else {
                rng.random_range(1..=1000)
            };
            json!(value)
        }
        ColumnType::Float => {
            let value = if contains_any(
                &name,
                &["price", "amount", "revenue", "total", "cost", "spend", "value"],
            ) {
                round(rng.random_range(5.0..500.0), 2)
            } else if contains_any(&name, &["rating", "score"]) {
                round(rng.random_range(1.0..5.0), 1)
            } else if contains_any(&name, &["rate", "percent", "ratio"]) {
                round(rng.random_range(0.0..1.0), 3)
            } else {
                round(rng.random_range(0.0..100.0), 2)
            };
            json!(value)
        }
        ColumnType::Boolean => json!(rng.random_bool(0.7)),
        ColumnType::Date => json!(random_day(rng).format("%Y-%m-%d").to_string()),
        ColumnType::Timestamp => {
            let seconds = rng.random_range(0..86_400);
            let timestamp = random_day(rng).and_hms_opt(0, 0, 0).unwrap_or_default()
                + ChronoDuration::seconds(seconds);
            json!(timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        }
    }
}

fn referenced_row_count(model: &DataModel, column: &ColumnSpec) -> Option<usize> {
    let (table, _) = column.references.as_deref()?.split_once('.')?;
    model.table(table).map(|t| t.row_count)
}

fn text_value(rng: &mut ChaCha8Rng, table: &TableSpec, name: &str, index: usize) -> String {
    if name.contains("email") {
        format!("user{}@example.com", index + 1)
    } else if name == "name" || name.ends_with("_name") {
        if table.name.contains("customer") || table.name.contains("user") || name.contains("first")
        {
            let first = FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.random_range(0..LAST_NAMES.len())];
            format!("{} {}", first, last)
        } else {
            format!("{} {}", singular(&table.name), index + 1)
        }
    } else if name.contains("status") {
        STATUSES[rng.random_range(0..STATUSES.len())].to_string()
    } else if name.contains("city") || name.contains("location") {
        CITIES[rng.random_range(0..CITIES.len())].to_string()
    } else {
        format!("{}_{}", name, rng.random_range(1..=20))
    }
}

fn random_day(rng: &mut ChaCha8Rng) -> NaiveDate {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default();
    start + ChronoDuration::days(rng.random_range(0..DATE_SPAN_DAYS))
}

fn singular(table: &str) -> String {
    let base = table.strip_suffix('s').unwrap_or(table).replace('_', " ");
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn contains_any(name: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| name.contains(n))
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::templates;
    use crate::agents::types::CompanyResearch;

    fn model() -> DataModel {
        templates::data_model(&CompanyResearch {
            company_name: "Acme".to_string(),
            industry: "Retail".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_generation_is_deterministic_per_url() {
        let model = model();
        let table = model.table("orders").unwrap();
        let a = generate_table(&model, table, "https://acme.test");
        let b = generate_table(&model, table, "https://acme.test");
        let c = generate_table(&model, table, "https://globex.test");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_keys_references_and_lists() {
        let model = model();
        let customers = model.table("customers").unwrap();
        let rows = generate_table(&model, customers, "https://acme.test");
        assert_eq!(rows.len(), customers.row_count);
        assert_eq!(rows[0]["customer_id"], 1);
        assert_eq!(rows[9]["customer_id"], 10);
        assert!(rows.iter().all(|r| r["interests"].is_array()));
        assert!(rows[0]["signup_date"].as_str().unwrap().starts_with("202"));

        let orders = model.table("orders").unwrap();
        for row in generate_table(&model, orders, "https://acme.test") {
            let customer = row["customer_id"].as_u64().unwrap() as usize;
            assert!((1..=customers.row_count).contains(&customer));
            assert!(row["ordered_at"].as_str().unwrap().ends_with('Z'));
        }
    }

    #[tokio::test]
    async fn test_stage_writes_every_table() {
        let mut state = PipelineState::new().with(keys::SOURCE_URL, json!("https://acme.test"));
        state.put(keys::DATA_MODEL, &model()).unwrap();
        let ctx = StageContext::detached("synthetic_data", "https://acme.test");

        let out = SyntheticDataAgent::new().execute(&state, &ctx).await.unwrap();
        let tables: SyntheticTables = out.state.require(keys::SYNTHETIC_DATA).unwrap();
        assert_eq!(tables.len(), 3);
        assert_eq!(tables["orders"].len(), 1000);
        assert_eq!(out.summary.unwrap()["rows"], 1240);
    }
}
