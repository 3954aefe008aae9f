use std::sync::Arc;

use async_trait::async_trait;
use cloudsql_core::{CloudSqlError, MemoryStore, Message};
use serde_json::Value;

use crate::executor::{QueryExecutor, SqlValue, Statement};
use crate::schema::{chat_history_table_statement, fetch_table_columns};
use crate::sql::{cast, qualified_name, quote_ident, require_name};

const REQUIRED_COLUMNS: [&str; 4] = ["id", "session_id", "data", "type"];

/// A chat message history stored in a Postgres table, one row per message.
///
/// The table must have exactly the columns `id, session_id, data, type`;
/// [`PostgresEngine::init_chat_history_table`](crate::PostgresEngine::init_chat_history_table)
/// creates a compatible one. Messages load in insertion (`id`) order.
pub struct PostgresChatMessageHistory {
    executor: Arc<dyn QueryExecutor>,
    table: String,
    data_type: String,
}

impl PostgresChatMessageHistory {
    /// Bind to `schema_name.table_name` after checking its columns.
    pub async fn create(
        executor: Arc<dyn QueryExecutor>,
        table_name: &str,
        schema_name: &str,
    ) -> Result<Self, CloudSqlError> {
        require_name("table", table_name)?;
        require_name("schema", schema_name)?;

        let columns = fetch_table_columns(executor.as_ref(), schema_name, table_name).await?;
        let mut names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        let mut expected = REQUIRED_COLUMNS;
        expected.sort_unstable();
        if names != expected {
            let create = chat_history_table_statement(schema_name, table_name)?;
            return Err(CloudSqlError::Configuration(format!(
                "Table {schema_name}.{table_name} has incorrect schema. Got column names {names:?} \
                 but required column names {expected:?}.\nPlease create the table with:\n{}",
                create.sql
            )));
        }

        let data_type = columns
            .iter()
            .find(|c| c.name == "data")
            .map(|c| c.cast_type())
            .unwrap_or_else(|| "jsonb".to_string());

        Ok(Self {
            executor,
            table: qualified_name(schema_name, table_name),
            data_type,
        })
    }
}

fn decode_message(value: SqlValue) -> Result<Message, CloudSqlError> {
    let json = match value {
        SqlValue::Json(v) => v,
        SqlValue::Text(raw) => serde_json::from_str::<Value>(&raw)?,
        other => {
            return Err(CloudSqlError::Memory(format!(
                "message data decoded as {other:?}"
            )))
        }
    };
    serde_json::from_value(json)
        .map_err(|e| CloudSqlError::Memory(format!("failed to parse message: {e}")))
}

#[async_trait]
impl MemoryStore for PostgresChatMessageHistory {
    async fn append(&self, session_id: &str, message: Message) -> Result<(), CloudSqlError> {
        let data = serde_json::to_string(&message)
            .map_err(|e| CloudSqlError::Memory(format!("failed to serialize message: {e}")))?;
        let mut stmt = Statement::default();
        let session = stmt.push_param(session_id);
        let data = cast(&stmt.push_param(data), &self.data_type);
        let kind = stmt.push_param(message.message_type());
        stmt.sql = format!(
            "INSERT INTO {} (session_id, data, {}) VALUES ({session}, {data}, {kind})",
            self.table,
            quote_ident("type")
        );
        self.executor.execute(&stmt).await?;
        tracing::debug!(
            "PostgresChatMessageHistory: appended {} message to session {session_id}",
            message.message_type()
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>, CloudSqlError> {
        let stmt = Statement::new(format!(
            "SELECT data FROM {} WHERE session_id = $1 ORDER BY id",
            self.table
        ))
        .bind(session_id);
        let rows = self.executor.fetch_all(&stmt).await?;
        rows.into_iter()
            .map(|row| decode_message(row.get("data").cloned().unwrap_or(SqlValue::Null)))
            .collect()
    }

    async fn clear(&self, session_id: &str) -> Result<(), CloudSqlError> {
        let stmt = Statement::new(format!("DELETE FROM {} WHERE session_id = $1", self.table))
            .bind(session_id);
        let deleted = self.executor.execute(&stmt).await?;
        tracing::debug!("PostgresChatMessageHistory: cleared {deleted} messages from {session_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_and_text_payloads() {
        let msg = decode_message(SqlValue::Json(json!({"type": "human", "content": "hi"}))).unwrap();
        assert_eq!(msg, Message::human("hi"));

        let msg = decode_message(SqlValue::Text(r#"{"type":"ai","content":"yo"}"#.into())).unwrap();
        assert_eq!(msg, Message::ai("yo"));
    }

    #[test]
    fn rejects_non_json_payloads() {
        let err = decode_message(SqlValue::Int(3)).unwrap_err();
        assert!(matches!(err, CloudSqlError::Memory(_)));
    }
}
