//! In-process [`QueryExecutor`] double shared by the integration tests.
//!
//! It answers `information_schema` lookups from registered tables, tracks
//! index names from `CREATE INDEX` / `DROP INDEX` statements, keeps chat
//! rows in memory and returns canned rows for everything else. Every
//! statement is recorded so tests can assert on the SQL issued.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use cloudsql_pg::{CloudSqlError, QueryExecutor, Row, SqlValue, Statement};
use serde_json::Value;

#[derive(Default)]
pub struct MockExecutor {
    tables: Mutex<HashMap<(String, String), Vec<(String, String, String)>>>,
    indexes: Mutex<HashSet<String>>,
    contested_indexes: Mutex<HashSet<String>>,
    search_rows: Mutex<Vec<Row>>,
    history: Mutex<Vec<(String, String)>>,
    log: Mutex<Vec<Statement>>,
    batches: Mutex<Vec<usize>>,
    closed: Mutex<bool>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table as `(name, data_type, udt_name)` triples.
    pub fn with_table(self, schema: &str, table: &str, columns: &[(&str, &str, &str)]) -> Self {
        self.tables.lock().unwrap().insert(
            (schema.to_string(), table.to_string()),
            columns
                .iter()
                .map(|(n, d, u)| (n.to_string(), d.to_string(), u.to_string()))
                .collect(),
        );
        self
    }

    pub fn with_index(self, name: &str) -> Self {
        self.indexes.lock().unwrap().insert(name.to_string());
        self
    }

    /// Another session creates `name` between the existence check and our
    /// `CREATE INDEX`, which then fails the way Postgres reports it.
    pub fn with_contested_index(self, name: &str) -> Self {
        self.contested_indexes.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn set_search_rows(&self, rows: Vec<Row>) {
        *self.search_rows.lock().unwrap() = rows;
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().unwrap().clone()
    }

    /// Statements other than catalog lookups.
    pub fn data_statements(&self) -> Vec<Statement> {
        self.statements()
            .into_iter()
            .filter(|s| !is_catalog_query(&s.sql))
            .collect()
    }

    /// Sizes of every `execute_batch` call, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.lock().unwrap().contains(name)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    fn apply(&self, stmt: &Statement) -> Result<u64, CloudSqlError> {
        self.log.lock().unwrap().push(stmt.clone());
        let sql = stmt.sql.as_str();
        let affected = if sql.starts_with("CREATE INDEX") {
            if let Some(name) = quoted(sql).first() {
                if self.contested_indexes.lock().unwrap().remove(name) {
                    self.indexes.lock().unwrap().insert(name.clone());
                    return Err(CloudSqlError::Conflict(format!(
                        "execute: relation \"{name}\" already exists"
                    )));
                }
                self.indexes.lock().unwrap().insert(name.clone());
            }
            0
        } else if sql.starts_with("DROP INDEX") {
            if let Some(name) = quoted(sql).last() {
                self.indexes.lock().unwrap().remove(name);
            }
            0
        } else if sql.starts_with("INSERT INTO") && sql.contains("(session_id, data") {
            let session = text_param(stmt, 0);
            let data = text_param(stmt, 1);
            self.history.lock().unwrap().push((session, data));
            1
        } else if sql.starts_with("DELETE FROM") && sql.contains("session_id = $1") {
            let session = text_param(stmt, 0);
            let mut history = self.history.lock().unwrap();
            let before = history.len();
            history.retain(|(s, _)| *s != session);
            (before - history.len()) as u64
        } else if sql.starts_with("INSERT INTO") {
            sql.matches("), (").count() as u64 + 1
        } else {
            1
        };
        Ok(affected)
    }

    fn query(&self, stmt: &Statement) -> Vec<Row> {
        self.log.lock().unwrap().push(stmt.clone());
        let sql = stmt.sql.as_str();
        if sql.contains("information_schema.columns") {
            let key = (text_param(stmt, 0), text_param(stmt, 1));
            return self
                .tables
                .lock()
                .unwrap()
                .get(&key)
                .map(|cols| {
                    cols.iter()
                        .map(|(n, d, u)| {
                            Row::new()
                                .with("column_name", n.as_str())
                                .with("data_type", d.as_str())
                                .with("udt_name", u.as_str())
                        })
                        .collect()
                })
                .unwrap_or_default();
        }
        if sql.contains("pg_index") {
            let name = text_param(stmt, 2);
            return if self.indexes.lock().unwrap().contains(&name) {
                vec![Row::new().with("indexname", name)]
            } else {
                Vec::new()
            };
        }
        if sql.starts_with("SELECT data FROM") {
            let session = text_param(stmt, 0);
            return self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _)| *s == session)
                .map(|(_, data)| {
                    let json: Value = serde_json::from_str(data).unwrap();
                    Row::new().with("data", SqlValue::Json(json))
                })
                .collect();
        }
        let limit = stmt
            .params
            .get(1)
            .and_then(SqlValue::as_i64)
            .unwrap_or(i64::MAX) as usize;
        self.search_rows
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }
}

fn is_catalog_query(sql: &str) -> bool {
    sql.contains("information_schema.columns") || sql.contains("pg_index")
}

fn text_param(stmt: &Statement, idx: usize) -> String {
    stmt.params
        .get(idx)
        .and_then(SqlValue::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Double-quoted identifiers in order of appearance.
fn quoted(sql: &str) -> Vec<String> {
    sql.split('"')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, statement: &Statement) -> Result<u64, CloudSqlError> {
        self.apply(statement)
    }

    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Row>, CloudSqlError> {
        Ok(self.query(statement))
    }

    async fn execute_batch(&self, statements: &[Statement]) -> Result<u64, CloudSqlError> {
        self.batches.lock().unwrap().push(statements.len());
        statements.iter().map(|s| self.apply(s)).sum()
    }

    async fn fetch_all_scoped(
        &self,
        setup: &[Statement],
        query: &Statement,
    ) -> Result<Vec<Row>, CloudSqlError> {
        for stmt in setup {
            self.apply(stmt)?;
        }
        Ok(self.query(query))
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// The layout created by `VectorStoreTableArgs::default()` plus two typed
/// metadata columns.
pub fn default_columns() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("langchain_id", "uuid", "uuid"),
        ("content", "text", "text"),
        ("embedding", "USER-DEFINED", "vector"),
        ("page", "text", "text"),
        ("source", "character varying", "varchar"),
        ("langchain_metadata", "json", "json"),
    ]
}

/// A search result row laid out the way the store selects it.
pub fn search_row(
    id: &str,
    content: &str,
    embedding: Vec<f32>,
    typed: &[(&str, SqlValue)],
    json: Option<Value>,
    distance: f64,
) -> Row {
    let mut row = Row::new()
        .with("langchain_id", id)
        .with("content", content)
        .with("embedding", embedding);
    for (name, value) in typed {
        row.push(*name, value.clone());
    }
    if let Some(json) = json {
        row.push("langchain_metadata", SqlValue::Json(json));
    }
    row.with("distance", SqlValue::Float(distance))
}
