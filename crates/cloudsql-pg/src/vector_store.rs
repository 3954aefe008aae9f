use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cloudsql_core::{CloudSqlError, Document, Embeddings, VectorStore};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::executor::{QueryExecutor, SqlValue, Statement};
use crate::indexes::{DistanceStrategy, QueryOptions, VectorIndex};
use crate::mmr::maximal_marginal_relevance;
use crate::schema::{
    fetch_table_columns, LiveColumn, DEFAULT_CONTENT_COLUMN, DEFAULT_EMBEDDING_COLUMN,
    DEFAULT_ID_COLUMN, DEFAULT_METADATA_JSON_COLUMN, DEFAULT_SCHEMA,
};
use crate::sql::{cast, qualified_name, quote_ident, require_name, MAX_BIND_PARAMS};

pub const DEFAULT_K: usize = 4;
pub const DEFAULT_FETCH_K: usize = 20;
pub const DEFAULT_LAMBDA_MULT: f32 = 0.5;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Column mapping and search settings for a [`PostgresVectorStore`].
///
/// At most one of `metadata_columns` (include only these) and
/// `ignore_metadata_columns` (include everything but these) may be set. With
/// neither, every column that is not the id, content, embedding or JSON
/// column is treated as metadata.
#[derive(Debug, Clone)]
pub struct PostgresVectorStoreConfig {
    pub schema_name: String,
    pub id_column: String,
    pub content_column: String,
    pub embedding_column: String,
    pub metadata_columns: Option<Vec<String>>,
    pub ignore_metadata_columns: Option<Vec<String>>,
    /// JSON overflow column; an empty name disables it.
    pub metadata_json_column: String,
    pub distance_strategy: DistanceStrategy,
    /// Applied with `SET LOCAL` around every search.
    pub index_query_options: Option<QueryOptions>,
}

impl Default for PostgresVectorStoreConfig {
    fn default() -> Self {
        Self {
            schema_name: DEFAULT_SCHEMA.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            content_column: DEFAULT_CONTENT_COLUMN.to_string(),
            embedding_column: DEFAULT_EMBEDDING_COLUMN.to_string(),
            metadata_columns: None,
            ignore_metadata_columns: None,
            metadata_json_column: DEFAULT_METADATA_JSON_COLUMN.to_string(),
            distance_strategy: DistanceStrategy::default(),
            index_query_options: None,
        }
    }
}

impl PostgresVectorStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
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

    pub fn with_metadata_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_ignore_metadata_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_metadata_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_metadata_json_column(mut self, column: impl Into<String>) -> Self {
        self.metadata_json_column = column.into();
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = strategy;
        self
    }

    pub fn with_index_query_options(mut self, options: QueryOptions) -> Self {
        self.index_query_options = Some(options);
        self
    }
}

/// The validated table layout a store operates on. Immutable after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub schema_name: String,
    pub table_name: String,
    pub id_column: LiveColumn,
    pub content_column: LiveColumn,
    pub embedding_column: LiveColumn,
    /// Effective metadata columns, in table order.
    pub metadata_columns: Vec<LiveColumn>,
    pub metadata_json_column: Option<LiveColumn>,
    pub distance_strategy: DistanceStrategy,
}

impl SchemaDescriptor {
    fn qualified_table(&self) -> String {
        qualified_name(&self.schema_name, &self.table_name)
    }
}

/// Options for maximal-marginal-relevance search.
#[derive(Debug, Clone, PartialEq)]
pub struct MmrOptions {
    /// Number of documents to return.
    pub k: usize,
    /// Size of the candidate pool fetched by vector distance; must be >= `k`.
    pub fetch_k: usize,
    /// 1.0 ranks purely by relevance, 0.0 purely by diversity.
    pub lambda_mult: f32,
    /// Raw SQL predicate, passed through unmodified.
    pub filter: Option<String>,
}

impl Default for MmrOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            fetch_k: DEFAULT_FETCH_K,
            lambda_mult: DEFAULT_LAMBDA_MULT,
            filter: None,
        }
    }
}

impl MmrOptions {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_fetch_k(mut self, fetch_k: usize) -> Self {
        self.fetch_k = fetch_k;
        self
    }

    pub fn with_lambda_mult(mut self, lambda_mult: f32) -> Self {
        self.lambda_mult = lambda_mult;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn validate(&self) -> Result<(), CloudSqlError> {
        if self.fetch_k < self.k {
            return Err(CloudSqlError::Validation(format!(
                "fetch_k ({}) must be greater than or equal to k ({})",
                self.fetch_k, self.k
            )));
        }
        if !(0.0..=1.0).contains(&self.lambda_mult) {
            return Err(CloudSqlError::Validation(format!(
                "lambda_mult must be within [0, 1], got {}",
                self.lambda_mult
            )));
        }
        Ok(())
    }
}

/// How [`PostgresVectorStore::apply_vector_index_with_options`] creates an index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Overrides the index's own name.
    pub name: Option<String>,
    /// Build with `CREATE INDEX CONCURRENTLY`.
    pub concurrently: bool,
    /// Drop an existing index of the same name instead of failing.
    pub replace_existing: bool,
}

struct SearchHit {
    document: Document,
    distance: f32,
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// PostgresVectorStore
// ---------------------------------------------------------------------------

/// A [`VectorStore`] over an existing pgvector table.
///
/// Construct with [`create`](Self::create), which validates the configured
/// columns against the live table once. Afterwards the store holds no
/// mutable state and can be shared freely between tasks.
///
/// Search filters are raw SQL predicates inserted into the `WHERE` clause
/// verbatim. They are a trust boundary: never build them from untrusted
/// input.
pub struct PostgresVectorStore {
    executor: Arc<dyn QueryExecutor>,
    embeddings: Arc<dyn Embeddings>,
    schema: SchemaDescriptor,
    index_query_options: Option<QueryOptions>,
}

impl PostgresVectorStore {
    fn new(
        executor: Arc<dyn QueryExecutor>,
        embeddings: Arc<dyn Embeddings>,
        schema: SchemaDescriptor,
        index_query_options: Option<QueryOptions>,
    ) -> Self {
        Self {
            executor,
            embeddings,
            schema,
            index_query_options,
        }
    }

    /// Validate `config` against `table_name` and build a store.
    pub async fn create(
        executor: Arc<dyn QueryExecutor>,
        embeddings: Arc<dyn Embeddings>,
        table_name: &str,
        config: PostgresVectorStoreConfig,
    ) -> Result<Self, CloudSqlError> {
        if config.metadata_columns.is_some() && config.ignore_metadata_columns.is_some() {
            return Err(CloudSqlError::Configuration(
                "Can not use both metadata_columns and ignore_metadata_columns.".to_string(),
            ));
        }
        require_name("table", table_name)?;
        require_name("schema", &config.schema_name)?;

        let columns =
            fetch_table_columns(executor.as_ref(), &config.schema_name, table_name).await?;
        let find = |name: &str| columns.iter().find(|c| c.name == name).cloned();

        let id_column = find(&config.id_column).ok_or_else(|| {
            CloudSqlError::Configuration(format!(
                "Id column, {}, does not exist.",
                config.id_column
            ))
        })?;
        let content_column = find(&config.content_column).ok_or_else(|| {
            CloudSqlError::Configuration(format!(
                "Content column, {}, does not exist.",
                config.content_column
            ))
        })?;
        if !content_column.is_text() {
            return Err(CloudSqlError::Configuration(format!(
                "Content column, {}, is type, {}. It must be a type of character string.",
                content_column.name, content_column.data_type
            )));
        }
        let embedding_column = find(&config.embedding_column).ok_or_else(|| {
            CloudSqlError::Configuration(format!(
                "Embedding column, {}, does not exist.",
                config.embedding_column
            ))
        })?;
        if !embedding_column.is_user_defined() {
            return Err(CloudSqlError::Configuration(format!(
                "Embedding column, {}, is not type Vector.",
                embedding_column.name
            )));
        }

        let metadata_json_column = if config.metadata_json_column.is_empty() {
            None
        } else {
            let found = find(&config.metadata_json_column);
            if found.is_none() {
                tracing::debug!(
                    "PostgresVectorStore: JSON metadata column '{}' not found, disabling it",
                    config.metadata_json_column
                );
            }
            found
        };

        let reserved = [
            id_column.name.as_str(),
            content_column.name.as_str(),
            embedding_column.name.as_str(),
            metadata_json_column
                .as_ref()
                .map(|c| c.name.as_str())
                .unwrap_or_default(),
        ];
        let metadata_columns = match (&config.metadata_columns, &config.ignore_metadata_columns) {
            (Some(included), _) => included
                .iter()
                .map(|name| -> Result<LiveColumn, CloudSqlError> {
                    let column = find(name).ok_or_else(|| {
                        CloudSqlError::Configuration(format!(
                            "Metadata column, {name}, does not exist."
                        ))
                    })?;
                    if reserved.contains(&name.as_str()) {
                        return Err(CloudSqlError::Configuration(format!(
                            "Metadata column, {name}, is already mapped as the id, content, \
                             embedding or JSON metadata column."
                        )));
                    }
                    Ok(column)
                })
                .collect::<Result<Vec<_>, _>>()?,
            (None, ignored) => columns
                .iter()
                .filter(|c| !reserved.contains(&c.name.as_str()))
                .filter(|c| ignored.as_ref().is_none_or(|ignored| !ignored.contains(&c.name)))
                .cloned()
                .collect(),
        };

        tracing::debug!(
            "PostgresVectorStore: bound to {}.{table_name} with metadata columns {:?}",
            config.schema_name,
            metadata_columns.iter().map(|c| &c.name).collect::<Vec<_>>()
        );

        let schema = SchemaDescriptor {
            schema_name: config.schema_name,
            table_name: table_name.to_string(),
            id_column,
            content_column,
            embedding_column,
            metadata_columns,
            metadata_json_column,
            distance_strategy: config.distance_strategy,
        };
        Ok(Self::new(
            executor,
            embeddings,
            schema,
            config.index_query_options,
        ))
    }

    /// Create a store and add `texts` (with optional per-text metadata) to it.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_texts(
        texts: &[&str],
        metadatas: Option<Vec<HashMap<String, Value>>>,
        ids: Option<Vec<String>>,
        executor: Arc<dyn QueryExecutor>,
        embeddings: Arc<dyn Embeddings>,
        table_name: &str,
        config: PostgresVectorStoreConfig,
    ) -> Result<Self, CloudSqlError> {
        let metadatas = match metadatas {
            Some(m) if m.len() != texts.len() => {
                return Err(CloudSqlError::Validation(
                    "The number of metadatas must match the number of texts provided."
                        .to_string(),
                ))
            }
            Some(m) => m,
            None => vec![HashMap::new(); texts.len()],
        };
        let docs = texts
            .iter()
            .zip(metadatas)
            .map(|(text, metadata)| Document::with_metadata("", *text, metadata))
            .collect();
        Self::from_documents(docs, ids, executor, embeddings, table_name, config).await
    }

    /// Create a store and add `docs` to it.
    pub async fn from_documents(
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
        executor: Arc<dyn QueryExecutor>,
        embeddings: Arc<dyn Embeddings>,
        table_name: &str,
        config: PostgresVectorStoreConfig,
    ) -> Result<Self, CloudSqlError> {
        let store = Self::create(executor, embeddings, table_name, config).await?;
        store.add_documents(docs, ids).await?;
        Ok(store)
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn embeddings(&self) -> &Arc<dyn Embeddings> {
        &self.embeddings
    }

    // -----------------------------------------------------------------------
    // Inserts
    // -----------------------------------------------------------------------

    fn insert_statements(
        &self,
        rows: Vec<(String, Document, Vec<f32>)>,
    ) -> Result<Vec<Statement>, CloudSqlError> {
        let schema = &self.schema;
        let mut column_names = vec![
            quote_ident(&schema.id_column.name),
            quote_ident(&schema.content_column.name),
            quote_ident(&schema.embedding_column.name),
        ];
        column_names.extend(schema.metadata_columns.iter().map(|c| quote_ident(&c.name)));
        if let Some(json) = &schema.metadata_json_column {
            column_names.push(quote_ident(&json.name));
        }
        let header = format!(
            "INSERT INTO {} ({}) VALUES ",
            schema.qualified_table(),
            column_names.join(", ")
        );
        let rows_per_statement = (MAX_BIND_PARAMS / column_names.len()).max(1);

        let mut statements = Vec::new();
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let mut stmt = Statement::new(header.clone());
            let mut tuples = Vec::new();
            for (id, doc, embedding) in rows.by_ref().take(rows_per_statement) {
                tuples.push(self.values_tuple(&mut stmt, id, doc, embedding)?);
            }
            stmt.sql.push_str(&tuples.join(", "));
            statements.push(stmt);
        }
        Ok(statements)
    }

    fn values_tuple(
        &self,
        stmt: &mut Statement,
        id: String,
        doc: Document,
        embedding: Vec<f32>,
    ) -> Result<String, CloudSqlError> {
        let schema = &self.schema;
        let mut values = vec![
            cast(&stmt.push_param(id), &schema.id_column.cast_type()),
            stmt.push_param(doc.content),
            cast(
                &stmt.push_param(SqlValue::Vector(embedding)),
                &schema.embedding_column.cast_type(),
            ),
        ];

        let mut extra = doc.metadata;
        for column in &schema.metadata_columns {
            match extra.remove(&column.name) {
                Some(value) => {
                    let param = metadata_param(column, &value)?;
                    values.push(cast(&stmt.push_param(param), &column.cast_type()));
                }
                None => values.push("NULL".to_string()),
            }
        }
        if let Some(json) = &schema.metadata_json_column {
            let extra: Map<String, Value> = extra.into_iter().collect();
            let serialized = serde_json::to_string(&Value::Object(extra))?;
            values.push(cast(&stmt.push_param(serialized), &json.cast_type()));
        }
        Ok(format!("({})", values.join(", ")))
    }

    /// Insert documents with pre-computed embeddings in one transaction.
    ///
    /// Metadata keys matching a metadata column go to that column; the rest
    /// go to the JSON column, or are dropped when there is none. Without
    /// `ids`, each document keeps its own non-empty id or gets a fresh UUID.
    pub async fn add_vectors(
        &self,
        vectors: Vec<Vec<f32>>,
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, CloudSqlError> {
        if vectors.len() != docs.len() {
            return Err(CloudSqlError::Validation(
                "The number of vectors must match the number of documents provided.".to_string(),
            ));
        }
        if let Some(ids) = &ids {
            if ids.len() != docs.len() {
                return Err(CloudSqlError::Validation(
                    "The number of ids must match the number of documents provided.".to_string(),
                ));
            }
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = match ids {
            Some(ids) => ids,
            None => docs
                .iter()
                .map(|d| {
                    if d.id.is_empty() {
                        Uuid::new_v4().to_string()
                    } else {
                        d.id.clone()
                    }
                })
                .collect(),
        };

        let rows = ids
            .iter()
            .cloned()
            .zip(docs)
            .zip(vectors)
            .map(|((id, doc), vector)| (id, doc, vector))
            .collect();
        let statements = self.insert_statements(rows)?;
        let inserted = self.executor.execute_batch(&statements).await?;
        tracing::debug!(
            "PostgresVectorStore: inserted {inserted} rows into {}.{} ({} statements)",
            self.schema.schema_name,
            self.schema.table_name,
            statements.len()
        );
        Ok(ids)
    }

    /// Embed `docs` with the store's embedder, then [`add_vectors`](Self::add_vectors).
    pub async fn add_documents(
        &self,
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, CloudSqlError> {
        if ids.as_ref().is_some_and(|ids| ids.len() != docs.len()) {
            return Err(CloudSqlError::Validation(
                "The number of ids must match the number of documents provided.".to_string(),
            ));
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        let vectors = self.embeddings.embed_documents(&texts).await?;
        if vectors.len() != docs.len() {
            return Err(CloudSqlError::Embedding(format!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                docs.len()
            )));
        }
        self.add_vectors(vectors, docs, ids).await
    }

    /// Delete rows by id. An empty list is a no-op returning `false`; ids
    /// that do not exist are ignored.
    pub async fn delete(&self, ids: &[&str]) -> Result<bool, CloudSqlError> {
        if ids.is_empty() {
            return Ok(false);
        }
        let id_column = &self.schema.id_column;
        let mut stmt = Statement::default();
        let placeholder = stmt.push_param(SqlValue::TextArray(
            ids.iter().map(|id| id.to_string()).collect(),
        ));
        stmt.sql = format!(
            "DELETE FROM {} WHERE {} = ANY(CAST({placeholder} AS {}[]))",
            self.schema.qualified_table(),
            quote_ident(&id_column.name),
            id_column.cast_type()
        );
        let deleted = self.executor.execute(&stmt).await?;
        tracing::debug!(
            "PostgresVectorStore: deleted {deleted} of {} requested rows",
            ids.len()
        );
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    fn search_statement(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Statement, CloudSqlError> {
        let k = i64::try_from(k)
            .map_err(|_| CloudSqlError::Validation(format!("k ({k}) is too large")))?;
        let schema = &self.schema;
        let mut stmt = Statement::default();
        let query_vector = cast(
            &stmt.push_param(SqlValue::Vector(embedding.to_vec())),
            &schema.embedding_column.cast_type(),
        );
        let limit = stmt.push_param(k);

        let embedding_col = quote_ident(&schema.embedding_column.name);
        let distance = format!(
            "{embedding_col} {} {query_vector}",
            schema.distance_strategy.operator()
        );

        let mut select = vec![
            format!("CAST({} AS TEXT)", quote_ident(&schema.id_column.name)),
            quote_ident(&schema.content_column.name),
            embedding_col,
        ];
        // Typed metadata travels as JSON so every column type decodes.
        select.extend(
            schema
                .metadata_columns
                .iter()
                .map(|c| format!("to_jsonb({})", quote_ident(&c.name))),
        );
        if let Some(json) = &schema.metadata_json_column {
            select.push(quote_ident(&json.name));
        }
        select.push(format!("{distance} AS distance"));

        let where_clause = match filter.map(str::trim) {
            Some(f) if !f.is_empty() => format!(" WHERE {f}"),
            _ => String::new(),
        };

        stmt.sql = format!(
            "SELECT {} FROM {}{where_clause} ORDER BY {distance} LIMIT {limit}",
            select.join(", "),
            schema.qualified_table()
        );
        Ok(stmt)
    }

    async fn query_collection(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<SearchHit>, CloudSqlError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let stmt = self.search_statement(embedding, k, filter)?;
        let rows = match &self.index_query_options {
            Some(options) => {
                self.executor
                    .fetch_all_scoped(&options.to_statements(), &stmt)
                    .await?
            }
            None => self.executor.fetch_all(&stmt).await?,
        };
        rows.into_iter()
            .map(|row| self.decode_hit(row.into_values()))
            .collect()
    }

    /// Decode a row laid out as
    /// `id, content, embedding, metadata..., [json], distance`.
    fn decode_hit(&self, values: Vec<SqlValue>) -> Result<SearchHit, CloudSqlError> {
        let schema = &self.schema;
        let expected = 4
            + schema.metadata_columns.len()
            + usize::from(schema.metadata_json_column.is_some());
        if values.len() != expected {
            return Err(CloudSqlError::Database(format!(
                "search row has {} columns, expected {expected}",
                values.len()
            )));
        }
        let mut values = values.into_iter();
        let mut next = || values.next().unwrap_or(SqlValue::Null);

        let id = match next() {
            SqlValue::Null => String::new(),
            other => match other.into_json() {
                Value::String(s) => s,
                v => v.to_string(),
            },
        };
        let content = match next() {
            SqlValue::Text(s) => s,
            SqlValue::Null => String::new(),
            other => {
                return Err(CloudSqlError::Database(format!(
                    "content column decoded as {other:?}"
                )))
            }
        };
        let embedding = match next() {
            SqlValue::Vector(v) => v,
            other => {
                return Err(CloudSqlError::Database(format!(
                    "embedding column decoded as {other:?}"
                )))
            }
        };

        let typed: Vec<(String, Value)> = schema
            .metadata_columns
            .iter()
            .map(|c| (c.name.clone(), next().into_json()))
            .collect();

        let mut metadata: HashMap<String, Value> = HashMap::new();
        if schema.metadata_json_column.is_some() {
            match next() {
                SqlValue::Json(Value::Object(map)) => metadata.extend(map),
                SqlValue::Text(raw) => {
                    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw) {
                        metadata.extend(map);
                    }
                }
                _ => {}
            }
        }
        metadata.extend(typed);

        let distance = next().as_f64().unwrap_or(f64::NAN) as f32;
        Ok(SearchHit {
            document: Document {
                id,
                content,
                metadata,
            },
            distance,
            embedding,
        })
    }

    /// Nearest neighbours of `embedding` with their distances, nearest first.
    pub async fn similarity_search_by_vector_with_score(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError> {
        let hits = self.query_collection(embedding, k, filter).await?;
        Ok(hits.into_iter().map(|h| (h.document, h.distance)).collect())
    }

    pub async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Document>, CloudSqlError> {
        let results = self
            .similarity_search_by_vector_with_score(embedding, k, filter)
            .await?;
        Ok(results.into_iter().map(|(doc, _)| doc).collect())
    }

    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError> {
        let embedding = self.embeddings.embed_query(query).await?;
        self.similarity_search_by_vector_with_score(&embedding, k, filter)
            .await
    }

    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Document>, CloudSqlError> {
        let results = self.similarity_search_with_score(query, k, filter).await?;
        Ok(results.into_iter().map(|(doc, _)| doc).collect())
    }

    /// Fetch `fetch_k` candidates by distance, then re-rank them with
    /// maximal marginal relevance. Results come back in selection order
    /// with their original distances.
    pub async fn max_marginal_relevance_search_by_vector_with_score(
        &self,
        embedding: &[f32],
        options: &MmrOptions,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError> {
        options.validate()?;
        let hits = self
            .query_collection(embedding, options.fetch_k, options.filter.as_deref())
            .await?;

        let (mut ranked, candidates): (Vec<Option<(Document, f32)>>, Vec<Vec<f32>>) = hits
            .into_iter()
            .map(|h| (Some((h.document, h.distance)), h.embedding))
            .unzip();
        let selected =
            maximal_marginal_relevance(embedding, &candidates, options.k, options.lambda_mult);
        Ok(selected
            .into_iter()
            .filter_map(|idx| ranked[idx].take())
            .collect())
    }

    pub async fn max_marginal_relevance_search_by_vector(
        &self,
        embedding: &[f32],
        options: &MmrOptions,
    ) -> Result<Vec<Document>, CloudSqlError> {
        let results = self
            .max_marginal_relevance_search_by_vector_with_score(embedding, options)
            .await?;
        Ok(results.into_iter().map(|(doc, _)| doc).collect())
    }

    pub async fn max_marginal_relevance_search_with_score(
        &self,
        query: &str,
        options: &MmrOptions,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError> {
        let embedding = self.embeddings.embed_query(query).await?;
        self.max_marginal_relevance_search_by_vector_with_score(&embedding, options)
            .await
    }

    pub async fn max_marginal_relevance_search(
        &self,
        query: &str,
        options: &MmrOptions,
    ) -> Result<Vec<Document>, CloudSqlError> {
        let results = self
            .max_marginal_relevance_search_with_score(query, options)
            .await?;
        Ok(results.into_iter().map(|(doc, _)| doc).collect())
    }

    // -----------------------------------------------------------------------
    // Index management
    // -----------------------------------------------------------------------

    fn index_name(&self, name: Option<&str>) -> String {
        name.map(str::to_string)
            .unwrap_or_else(|| crate::indexes::default_index_name(&self.schema.table_name))
    }

    fn index_lookup(&self, name: &str, sql: &str) -> Statement {
        Statement::new(sql)
            .bind(self.schema.schema_name.as_str())
            .bind(self.schema.table_name.as_str())
            .bind(name)
    }

    fn drop_index_statement(&self, name: &str) -> Statement {
        Statement::new(format!(
            "DROP INDEX IF EXISTS {}",
            qualified_name(&self.schema.schema_name, name)
        ))
    }

    async fn index_exists(&self, name: &str) -> Result<bool, CloudSqlError> {
        let stmt = self.index_lookup(
            name,
            "SELECT indexname::text AS indexname FROM pg_indexes \
             WHERE schemaname = $1 AND tablename = $2 AND indexname = $3",
        );
        Ok(!self.executor.fetch_all(&stmt).await?.is_empty())
    }

    /// Resolve the column an index targets. Columns other than the
    /// embedding column must exist on the table and be vector-typed.
    async fn index_target(&self, index: &VectorIndex) -> Result<String, CloudSqlError> {
        let schema = &self.schema;
        let column = match index.column() {
            None => return Ok(schema.embedding_column.name.clone()),
            Some(column) if column == schema.embedding_column.name => return Ok(column.into()),
            Some(column) => column,
        };
        let columns =
            fetch_table_columns(self.executor.as_ref(), &schema.schema_name, &schema.table_name)
                .await?;
        match columns.iter().find(|c| c.name == column) {
            Some(live) if live.is_user_defined() => Ok(live.name.clone()),
            Some(_) => Err(CloudSqlError::Configuration(format!(
                "Index column, {column}, is not type Vector."
            ))),
            None => Err(CloudSqlError::Configuration(format!(
                "Index column, {column}, does not exist."
            ))),
        }
    }

    /// Create an ANN index on the embedding column, or on the descriptor's
    /// own target column when it names one.
    ///
    /// Fails with [`CloudSqlError::Conflict`] if the index already exists and
    /// `replace_existing` is false. Applying
    /// [`VectorIndex::ExactNearestNeighbor`] drops the default index instead.
    pub async fn apply_vector_index(
        &self,
        index: impl Into<VectorIndex>,
        replace_existing: bool,
    ) -> Result<(), CloudSqlError> {
        let options = IndexOptions {
            replace_existing,
            ..IndexOptions::default()
        };
        self.apply_vector_index_with_options(index, options).await
    }

    pub async fn apply_vector_index_with_options(
        &self,
        index: impl Into<VectorIndex>,
        options: IndexOptions,
    ) -> Result<(), CloudSqlError> {
        let index = index.into();
        let schema = &self.schema;
        let name = options
            .name
            .unwrap_or_else(|| index.resolved_name(&schema.table_name));

        let column = self.index_target(&index).await?;

        let Some(create) = index.create_statement(
            &name,
            &schema.schema_name,
            &schema.table_name,
            &column,
            options.concurrently,
        ) else {
            return self.drop_vector_index(Some(&name)).await;
        };

        let mut statements = Vec::with_capacity(2);
        if self.index_exists(&name).await? {
            if !options.replace_existing {
                return Err(CloudSqlError::Conflict(format!(
                    "Index, {name}, already exists on {}.{}.",
                    schema.schema_name, schema.table_name
                )));
            }
            statements.push(self.drop_index_statement(&name));
        }
        statements.push(create);

        if options.concurrently {
            // CREATE INDEX CONCURRENTLY cannot run inside a transaction block.
            for stmt in &statements {
                self.executor.execute(stmt).await?;
            }
        } else {
            self.executor.execute_batch(&statements).await?;
        }
        tracing::info!(
            "PostgresVectorStore: created {} index {name} on {}.{}",
            index.index_type(),
            schema.schema_name,
            schema.table_name
        );
        Ok(())
    }

    /// Whether a usable index with this name (default: `<table>langchainvectorindex`)
    /// exists on the table. Absent or invalid indexes report `false`.
    pub async fn is_valid_index(&self, name: Option<&str>) -> Result<bool, CloudSqlError> {
        let name = self.index_name(name);
        let stmt = self.index_lookup(
            &name,
            "SELECT i.relname::text AS indexname FROM pg_index x \
             JOIN pg_class i ON i.oid = x.indexrelid \
             JOIN pg_class t ON t.oid = x.indrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             WHERE n.nspname = $1 AND t.relname = $2 AND i.relname = $3 AND x.indisvalid",
        );
        Ok(!self.executor.fetch_all(&stmt).await?.is_empty())
    }

    /// Drop the named (or default) index. A missing index is not an error.
    pub async fn drop_vector_index(&self, name: Option<&str>) -> Result<(), CloudSqlError> {
        let name = self.index_name(name);
        self.executor
            .execute(&self.drop_index_statement(&name))
            .await?;
        tracing::info!("PostgresVectorStore: dropped index {name} if present");
        Ok(())
    }

    /// Rebuild the named (or default) index.
    pub async fn reindex(&self, name: Option<&str>) -> Result<(), CloudSqlError> {
        let name = self.index_name(name);
        let stmt = Statement::new(format!(
            "REINDEX INDEX {}",
            qualified_name(&self.schema.schema_name, &name)
        ));
        self.executor.execute(&stmt).await?;
        tracing::info!("PostgresVectorStore: reindexed {name}");
        Ok(())
    }
}

/// Bind a metadata value for `column`. JSON columns receive serialized text
/// so that plain strings and numbers become valid JSON documents; array
/// columns (`_`-prefixed udt names) receive a Postgres array literal.
fn metadata_param(column: &LiveColumn, value: &Value) -> Result<SqlValue, CloudSqlError> {
    if matches!(column.udt_name.as_str(), "json" | "jsonb") {
        return Ok(SqlValue::Text(serde_json::to_string(value)?));
    }
    if column.udt_name.starts_with('_') && value.is_array() {
        return Ok(SqlValue::Text(array_literal(value)));
    }
    Ok(SqlValue::from_json(value))
}

fn array_literal(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(array_literal).collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_array_element(s),
        Value::Object(_) => quote_array_element(&value.to_string()),
    }
}

fn quote_array_element(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl VectorStore for PostgresVectorStore {
    async fn add_documents(
        &self,
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, CloudSqlError> {
        PostgresVectorStore::add_documents(self, docs, ids).await
    }

    async fn add_vectors(
        &self,
        vectors: Vec<Vec<f32>>,
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, CloudSqlError> {
        PostgresVectorStore::add_vectors(self, vectors, docs, ids).await
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Document>, CloudSqlError> {
        PostgresVectorStore::similarity_search(self, query, k, filter).await
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError> {
        PostgresVectorStore::similarity_search_with_score(self, query, k, filter).await
    }

    async fn similarity_search_by_vector_with_score(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError> {
        PostgresVectorStore::similarity_search_by_vector_with_score(self, embedding, k, filter)
            .await
    }

    async fn delete(&self, ids: &[&str]) -> Result<bool, CloudSqlError> {
        PostgresVectorStore::delete(self, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmr_options_defaults() {
        let options = MmrOptions::default();
        assert_eq!(options.k, 4);
        assert_eq!(options.fetch_k, 20);
        assert_eq!(options.lambda_mult, 0.5);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn mmr_options_validation() {
        let err = MmrOptions::new(5).with_fetch_k(3).validate().unwrap_err();
        assert!(matches!(err, CloudSqlError::Validation(_)));
        let err = MmrOptions::new(1).with_lambda_mult(1.5).validate().unwrap_err();
        assert!(matches!(err, CloudSqlError::Validation(_)));
        assert!(MmrOptions::new(1).with_lambda_mult(0.0).validate().is_ok());
    }

    #[test]
    fn config_defaults() {
        let config = PostgresVectorStoreConfig::default();
        assert_eq!(config.schema_name, "public");
        assert_eq!(config.id_column, "langchain_id");
        assert_eq!(config.content_column, "content");
        assert_eq!(config.embedding_column, "embedding");
        assert_eq!(config.metadata_json_column, "langchain_metadata");
        assert!(config.metadata_columns.is_none());
        assert!(config.ignore_metadata_columns.is_none());
    }

    #[test]
    fn array_columns_receive_array_literals() {
        let tags = LiveColumn {
            name: "tags".into(),
            data_type: "ARRAY".into(),
            udt_name: "_text".into(),
        };
        assert_eq!(
            metadata_param(&tags, &serde_json::json!(["a", "b\"c", null])).unwrap(),
            SqlValue::Text(r#"{"a","b\"c",NULL}"#.into())
        );
        assert_eq!(
            array_literal(&serde_json::json!([[1, 2], [3, 4]])),
            "{{1,2},{3,4}}"
        );
    }

    #[test]
    fn metadata_param_serializes_for_json_columns() {
        let json = LiveColumn {
            name: "extra".into(),
            data_type: "jsonb".into(),
            udt_name: "jsonb".into(),
        };
        let text = LiveColumn {
            name: "page".into(),
            data_type: "text".into(),
            udt_name: "text".into(),
        };
        assert_eq!(
            metadata_param(&json, &Value::from("x")).unwrap(),
            SqlValue::Text("\"x\"".into())
        );
        assert_eq!(
            metadata_param(&text, &Value::from("x")).unwrap(),
            SqlValue::Text("x".into())
        );
    }
}
