//! Table provisioning arguments and live-table introspection.

use cloudsql_core::CloudSqlError;

use crate::executor::{QueryExecutor, Statement};
use crate::sql::{qualified_name, quote_ident, require_name, validate_type_name};

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_CONTENT_COLUMN: &str = "content";
pub const DEFAULT_EMBEDDING_COLUMN: &str = "embedding";
pub const DEFAULT_ID_COLUMN: &str = "langchain_id";
pub const DEFAULT_METADATA_JSON_COLUMN: &str = "langchain_metadata";

/// A named, typed table column used when provisioning tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl Column {
    /// A nullable column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn validate(&self) -> Result<(), CloudSqlError> {
        require_name("column", &self.name)?;
        validate_type_name(&self.data_type)
    }

    fn render(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.data_type.trim());
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }
}

/// Arguments for [`PostgresEngine::init_vectorstore_table`](crate::PostgresEngine::init_vectorstore_table).
#[derive(Debug, Clone)]
pub struct VectorStoreTableArgs {
    pub schema_name: String,
    pub content_column: String,
    pub embedding_column: String,
    /// Typed metadata columns, created in this order.
    pub metadata_columns: Vec<Column>,
    pub metadata_json_column: String,
    /// Primary key column; its type defaults to `UUID`.
    pub id_column: Column,
    /// Drop an existing table of the same name first.
    pub overwrite_existing: bool,
    /// Create the JSON overflow column.
    pub store_metadata: bool,
}

impl Default for VectorStoreTableArgs {
    fn default() -> Self {
        Self {
            schema_name: DEFAULT_SCHEMA.to_string(),
            content_column: DEFAULT_CONTENT_COLUMN.to_string(),
            embedding_column: DEFAULT_EMBEDDING_COLUMN.to_string(),
            metadata_columns: Vec::new(),
            metadata_json_column: DEFAULT_METADATA_JSON_COLUMN.to_string(),
            id_column: Column::new(DEFAULT_ID_COLUMN, "UUID"),
            overwrite_existing: false,
            store_metadata: true,
        }
    }
}

impl VectorStoreTableArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_content_column(mut self, column: impl Into<String>) -> Self {
        self.content_column = column.into();
        self
    }

    pub fn with_embedding_column(mut self, column: impl Into<String>) -> Self {
        self.embedding_column = column.into();
        self
    }

    pub fn with_metadata_columns(mut self, columns: Vec<Column>) -> Self {
        self.metadata_columns = columns;
        self
    }

    pub fn with_metadata_json_column(mut self, column: impl Into<String>) -> Self {
        self.metadata_json_column = column.into();
        self
    }

    /// Use a custom id column name, keeping the `UUID` type.
    pub fn with_id_column_name(mut self, name: impl Into<String>) -> Self {
        self.id_column.name = name.into();
        self
    }

    pub fn with_id_column(mut self, column: Column) -> Self {
        self.id_column = column;
        self
    }

    pub fn with_overwrite_existing(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    pub fn with_store_metadata(mut self, store: bool) -> Self {
        self.store_metadata = store;
        self
    }

    /// Render the provisioning statements, in execution order.
    pub(crate) fn statements(
        &self,
        table_name: &str,
        vector_size: u32,
    ) -> Result<Vec<Statement>, CloudSqlError> {
        require_name("table", table_name)?;
        require_name("schema", &self.schema_name)?;
        require_name("content column", &self.content_column)?;
        require_name("embedding column", &self.embedding_column)?;
        if vector_size == 0 {
            return Err(CloudSqlError::Configuration(
                "vector_size must be > 0".to_string(),
            ));
        }
        self.id_column.validate()?;
        for column in &self.metadata_columns {
            column.validate()?;
        }
        if self.store_metadata {
            require_name("metadata json column", &self.metadata_json_column)?;
        }

        let table = qualified_name(&self.schema_name, table_name);
        let mut statements = vec![Statement::new("CREATE EXTENSION IF NOT EXISTS vector")];
        if self.overwrite_existing {
            statements.push(Statement::new(format!("DROP TABLE IF EXISTS {table}")));
        }

        let mut defs = vec![
            format!(
                "{} {} PRIMARY KEY",
                quote_ident(&self.id_column.name),
                self.id_column.data_type.trim()
            ),
            format!("{} TEXT NOT NULL", quote_ident(&self.content_column)),
            format!(
                "{} vector({vector_size}) NOT NULL",
                quote_ident(&self.embedding_column)
            ),
        ];
        defs.extend(self.metadata_columns.iter().map(Column::render));
        if self.store_metadata {
            defs.push(format!("{} JSON", quote_ident(&self.metadata_json_column)));
        }

        statements.push(Statement::new(format!(
            "CREATE TABLE {table}(\n  {}\n)",
            defs.join(",\n  ")
        )));
        Ok(statements)
    }
}

/// Chat-history table DDL.
pub(crate) fn chat_history_table_statement(
    schema_name: &str,
    table_name: &str,
) -> Result<Statement, CloudSqlError> {
    require_name("table", table_name)?;
    require_name("schema", schema_name)?;
    Ok(Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {}(\n  \
         id SERIAL PRIMARY KEY,\n  \
         session_id TEXT NOT NULL,\n  \
         data JSONB NOT NULL,\n  \
         type TEXT NOT NULL\n)",
        qualified_name(schema_name, table_name)
    )))
}

// ---------------------------------------------------------------------------
// Live-table introspection
// ---------------------------------------------------------------------------

/// A column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    /// SQL-standard type name, e.g. `text` or `USER-DEFINED`.
    pub data_type: String,
    /// Underlying Postgres type name, e.g. `text`, `uuid`, `vector`.
    pub udt_name: String,
}

impl LiveColumn {
    pub fn is_text(&self) -> bool {
        self.data_type == "text" || self.data_type.contains("char")
    }

    pub fn is_user_defined(&self) -> bool {
        self.data_type == "USER-DEFINED"
    }

    /// Type name usable in a `CAST(... AS <type>)`.
    pub fn cast_type(&self) -> String {
        quote_ident(&self.udt_name)
    }
}

/// List a table's columns in declaration order. Empty when the table is absent.
pub async fn fetch_table_columns(
    executor: &dyn QueryExecutor,
    schema_name: &str,
    table_name: &str,
) -> Result<Vec<LiveColumn>, CloudSqlError> {
    let stmt = Statement::new(
        "SELECT column_name::text AS column_name, data_type::text AS data_type, \
         udt_name::text AS udt_name \
         FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 \
         ORDER BY ordinal_position",
    )
    .bind(schema_name)
    .bind(table_name);

    let rows = executor.fetch_all(&stmt).await?;
    rows.into_iter()
        .map(|row| {
            let field = |name: &str| {
                row.get_str(name).map(str::to_string).ok_or_else(|| {
                    CloudSqlError::Database(format!(
                        "information_schema row is missing '{name}'"
                    ))
                })
            };
            Ok(LiveColumn {
                name: field("column_name")?,
                data_type: field("data_type")?,
                udt_name: field("udt_name")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_statements() {
        let stmts = VectorStoreTableArgs::default()
            .statements("items", 768)
            .unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].sql, "CREATE EXTENSION IF NOT EXISTS vector");
        assert_eq!(
            stmts[1].sql,
            "CREATE TABLE \"public\".\"items\"(\n  \
             \"langchain_id\" UUID PRIMARY KEY,\n  \
             \"content\" TEXT NOT NULL,\n  \
             \"embedding\" vector(768) NOT NULL,\n  \
             \"langchain_metadata\" JSON\n)"
        );
    }

    #[test]
    fn custom_table_statements() {
        let args = VectorStoreTableArgs::new()
            .with_schema_name("vs")
            .with_id_column_name("uuid")
            .with_content_column("my_content")
            .with_embedding_column("my_embedding")
            .with_metadata_columns(vec![
                Column::new("page", "TEXT"),
                Column::new("source", "VARCHAR(64)").not_null(),
            ])
            .with_store_metadata(false)
            .with_overwrite_existing(true);
        let stmts = args.statements("custom", 3).unwrap();
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[1].sql, "DROP TABLE IF EXISTS \"vs\".\"custom\"");
        let create = &stmts[2].sql;
        assert!(create.contains("\"uuid\" UUID PRIMARY KEY"));
        assert!(create.contains("\"my_embedding\" vector(3) NOT NULL"));
        assert!(create.contains("\"page\" TEXT,"));
        assert!(create.contains("\"source\" VARCHAR(64) NOT NULL"));
        assert!(!create.contains("JSON"));
    }

    #[test]
    fn rejects_bad_arguments() {
        let args = VectorStoreTableArgs::default();
        assert!(matches!(
            args.statements("items", 0),
            Err(CloudSqlError::Configuration(_))
        ));
        assert!(args.statements("", 3).is_err());

        let args = VectorStoreTableArgs::default()
            .with_metadata_columns(vec![Column::new("page", "TEXT); DROP TABLE x; --")]);
        assert!(matches!(
            args.statements("items", 3),
            Err(CloudSqlError::Configuration(_))
        ));
    }

    #[test]
    fn chat_history_statement() {
        let stmt = chat_history_table_statement("public", "messages").unwrap();
        assert!(stmt.sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"messages\"("));
        assert!(stmt.sql.contains("session_id TEXT NOT NULL"));
        assert!(stmt.sql.contains("data JSONB NOT NULL"));
    }

    #[test]
    fn live_column_classification() {
        let col = LiveColumn {
            name: "c".into(),
            data_type: "character varying".into(),
            udt_name: "varchar".into(),
        };
        assert!(col.is_text());
        assert!(!col.is_user_defined());
        assert_eq!(col.cast_type(), "\"varchar\"");
    }
}
