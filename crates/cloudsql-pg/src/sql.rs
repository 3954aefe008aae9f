//! Identifier quoting and type-name checks for dynamically assembled SQL.
//!
//! Identifiers (schemas, tables, columns, indexes) are always double-quoted,
//! never validated against an allow-list, so any name Postgres accepts works.
//! Type names cannot be quoted when they carry modifiers (`VARCHAR(20)`), so
//! they are checked against a conservative grammar instead. Values always
//! travel as bind parameters.

use std::sync::LazyLock;

use cloudsql_core::CloudSqlError;
use regex::Regex;

/// Postgres limit on bind parameters per statement.
pub(crate) const MAX_BIND_PARAMS: usize = 65_535;

static TYPE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*( [A-Za-z_][A-Za-z0-9_]*)*(\(\s*\d+\s*(,\s*\d+\s*)?\))?(\[\])*$")
        .expect("type name pattern is valid")
});

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."name"`.
pub fn qualified_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Check that `data_type` is a plain SQL type name such as `TEXT`,
/// `double precision`, `VARCHAR(20)`, `NUMERIC(10, 2)` or `text[]`.
pub fn validate_type_name(data_type: &str) -> Result<(), CloudSqlError> {
    if TYPE_NAME.is_match(data_type.trim()) {
        Ok(())
    } else {
        Err(CloudSqlError::Configuration(format!(
            "invalid column data type '{data_type}'"
        )))
    }
}

/// `CAST(<placeholder> AS <type>)`.
pub(crate) fn cast(placeholder: &str, data_type: &str) -> String {
    format!("CAST({placeholder} AS {data_type})")
}

/// Reject empty identifiers before they reach a statement.
pub(crate) fn require_name(kind: &str, name: &str) -> Result<(), CloudSqlError> {
    if name.trim().is_empty() {
        return Err(CloudSqlError::Configuration(format!(
            "{kind} name must not be empty"
        )));
    }
    Ok(())
}
