// src/executor.rs
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use tracing::{debug, info};

use crate::error::EngineError;

/// Outcome of one statement execution.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// SELECT path. `rows` is how many rows were pulled before the fetch cap
    /// (if `capped`, more rows existed server-side but were never fetched).
    /// `sample` holds up to the first few rows for logging; the rest are
    /// counted, not retained.
    Rows {
        rows: usize,
        capped: bool,
        sample: Vec<Value>,
    },
    /// Non-SELECT path: success is "did not throw".
    Statement { rows_affected: u64 },
}

impl QueryOutcome {
    pub fn summary(&self) -> String {
        match self {
            QueryOutcome::Rows { rows, capped: true, .. } => {
                format!("{rows}+ rows (fetch capped)")
            }
            QueryOutcome::Rows { rows, .. } => format!("{rows} rows"),
            QueryOutcome::Statement { rows_affected } => {
                format!("{rows_affected} rows affected")
            }
        }
    }
}

/// Seam between the runner and the SQL driver, so a stricter classifier or a
/// canned executor can be swapped in without touching the runner.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, pool: &PgPool) -> Result<QueryOutcome, EngineError>;
}

/// Executes operator-supplied SQL against a resolved pool.
pub struct SqlExecutor {
    /// Upper bound on rows pulled for a SELECT. Rows past the cap stay on
    /// the server.
    pub max_fetch_rows: usize,
    /// How many leading rows get echoed to the log as JSON.
    pub sample_rows: usize,
}

impl SqlExecutor {
    pub fn new(max_fetch_rows: usize, sample_rows: usize) -> Self {
        Self { max_fetch_rows, sample_rows }
    }
}

#[async_trait]
impl QueryExecutor for SqlExecutor {
    async fn execute(&self, sql: &str, pool: &PgPool) -> Result<QueryOutcome, EngineError> {
        debug!(sql = %sql, "Executing query");

        if is_select(sql) {
            let mut stream = sqlx::query(sql).fetch(pool);
            let mut rows = 0usize;
            let mut capped = false;
            let mut sample: Vec<Value> = Vec::with_capacity(self.sample_rows);

            while let Some(row) = stream.try_next().await.map_err(EngineError::ExecutionFailed)? {
                if sample.len() < self.sample_rows {
                    sample.push(row_to_json(&row));
                }
                rows += 1;
                if rows >= self.max_fetch_rows {
                    capped = true;
                    break;
                }
            }
            drop(stream);

            info!(rows, capped, "Query result");
            for (i, row) in sample.iter().enumerate() {
                info!("Row {}: {}", i + 1, row);
            }
            if rows > sample.len() {
                info!("... and {} more rows.", rows - sample.len());
            }

            Ok(QueryOutcome::Rows { rows, capped, sample })
        } else {
            let result = sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(EngineError::ExecutionFailed)?;
            info!(rows_affected = result.rows_affected(), "Non-SELECT query executed successfully");
            Ok(QueryOutcome::Statement { rows_affected: result.rows_affected() })
        }
    }
}

/// Prefix heuristic, not a parser: trims, case-folds, tests for "select".
/// Statements like `WITH x AS (SELECT ...) INSERT ...` misclassify as
/// non-SELECT; that is a known limitation.
pub fn is_select(sql: &str) -> bool {
    sql.trim().to_lowercase().starts_with("select")
}

/// Render one row as a JSON object keyed by column name. Types without a
/// straightforward JSON shape render as a `<typename>` placeholder rather
/// than failing the run.
fn row_to_json(row: &PgRow) -> Value {
    let mut map = Map::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), column_to_json(row, idx, col.type_info().name()));
    }
    Value::Object(map)
}

fn column_to_json(row: &PgRow, idx: usize, ty: &str) -> Value {
    let decoded: Result<Value, sqlx::Error> = match ty {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null)),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(|n| Value::from(n as f64)).unwrap_or(Value::Null)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(idx)
            .map(|v| v.map(Value::String).unwrap_or(Value::Null)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null)),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null)),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(idx)
            .map(|v| v.unwrap_or(Value::Null)),
        other => Ok(Value::String(format!("<{other}>"))),
    };
    decoded.unwrap_or_else(|_| Value::String(format!("<{ty}>")))
}
