use async_trait::async_trait;
use cloudsql_core::CloudSqlError;
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SqlValue
// ---------------------------------------------------------------------------

/// A bind parameter or a decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
    Uuid(Uuid),
    Vector(Vec<f32>),
    TextArray(Vec<String>),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Float(f) => Some(*f),
            SqlValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Convert a JSON metadata value into a bind parameter.
    ///
    /// Objects and arrays stay JSON; the column cast decides the final type.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Json(other.clone()),
        }
    }

    /// Convert a decoded column value into JSON metadata.
    pub fn into_json(self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(b),
            SqlValue::Int(i) => Value::from(i),
            SqlValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Json(v) => v,
            SqlValue::Uuid(u) => Value::String(u.to_string()),
            SqlValue::Vector(v) => Value::from(v),
            SqlValue::TextArray(a) => Value::from(a),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<Vec<f32>> for SqlValue {
    fn from(value: Vec<f32>) -> Self {
        SqlValue::Vector(value)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(value: Vec<String>) -> Self {
        SqlValue::TextArray(value)
    }
}

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// A result row: ordered `(column name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        self.columns.push((name.into(), value.into()));
    }

    /// First column with the given name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(SqlValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.columns.into_iter().map(|(_, value)| value).collect()
    }
}

// ---------------------------------------------------------------------------
// Statement
// ---------------------------------------------------------------------------

/// SQL text with `$1..$n` placeholders and the values bound to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind the next positional parameter, builder style.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Register a parameter and return its placeholder (`$n`).
    pub fn push_param(&mut self, value: impl Into<SqlValue>) -> String {
        self.params.push(value.into());
        format!("${}", self.params.len())
    }
}

// ---------------------------------------------------------------------------
// QueryExecutor
// ---------------------------------------------------------------------------

/// Issues SQL against the backing database. Owns pooling and transactions.
///
/// Implementations must be safe to share between concurrent callers.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a statement and return the number of affected rows.
    async fn execute(&self, statement: &Statement) -> Result<u64, CloudSqlError>;

    /// Run a query and return every row.
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Row>, CloudSqlError>;

    /// Run statements in a single transaction. Either all apply or none do.
    async fn execute_batch(&self, statements: &[Statement]) -> Result<u64, CloudSqlError>;

    /// Run `setup` then `query` in a single transaction and return the query's rows.
    ///
    /// Used for transaction-scoped settings such as `SET LOCAL hnsw.ef_search`.
    async fn fetch_all_scoped(
        &self,
        setup: &[Statement],
        query: &Statement,
    ) -> Result<Vec<Row>, CloudSqlError>;

    /// Release pool resources. Calling it twice is harmless.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_param_numbers_placeholders() {
        let mut stmt = Statement::new("");
        assert_eq!(stmt.push_param("a"), "$1");
        assert_eq!(stmt.push_param(2i64), "$2");
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn json_values_map_to_sql_values() {
        assert_eq!(SqlValue::from_json(&json!("2")), SqlValue::Text("2".into()));
        assert_eq!(SqlValue::from_json(&json!(7)), SqlValue::Int(7));
        assert_eq!(SqlValue::from_json(&json!(0.5)), SqlValue::Float(0.5));
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(
            SqlValue::from_json(&json!({"a": 1})),
            SqlValue::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn sql_values_map_back_to_json() {
        assert_eq!(SqlValue::Float(f64::NAN).into_json(), Value::Null);
        assert_eq!(SqlValue::Int(3).into_json(), json!(3));
        let id = Uuid::new_v4();
        assert_eq!(SqlValue::Uuid(id).into_json(), json!(id.to_string()));
        assert_eq!(
            SqlValue::TextArray(vec!["a".into()]).into_json(),
            json!(["a"])
        );
    }

    #[test]
    fn row_lookup_returns_first_match() {
        let row = Row::new()
            .with("page", "1")
            .with("page", "2")
            .with("n", 4i64);
        assert_eq!(row.get_str("page"), Some("1"));
        assert_eq!(row.get("n").and_then(SqlValue::as_i64), Some(4));
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 3);
    }
}
