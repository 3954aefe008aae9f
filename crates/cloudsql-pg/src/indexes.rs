//! ANN index descriptors and their `CREATE INDEX` rendering.

use serde::{Deserialize, Serialize};

use crate::executor::Statement;
use crate::sql::{qualified_name, quote_ident};

/// Appended to the table name when an index has no explicit name.
pub const DEFAULT_INDEX_NAME_SUFFIX: &str = "langchainvectorindex";

/// Distance function used for ranking and for the index operator class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceStrategy {
    /// `<=>`: 0 for identical direction, 2 for opposite.
    #[default]
    CosineDistance,
    /// `<->`: L2 distance, 0 for identical vectors.
    Euclidean,
    /// `<#>`: negative inner product, more negative is more similar.
    InnerProduct,
}

impl DistanceStrategy {
    /// pgvector ordering operator.
    pub fn operator(&self) -> &'static str {
        match self {
            DistanceStrategy::CosineDistance => "<=>",
            DistanceStrategy::Euclidean => "<->",
            DistanceStrategy::InnerProduct => "<#>",
        }
    }

    /// pgvector operator class for index creation.
    pub fn index_function(&self) -> &'static str {
        match self {
            DistanceStrategy::CosineDistance => "vector_cosine_ops",
            DistanceStrategy::Euclidean => "vector_l2_ops",
            DistanceStrategy::InnerProduct => "vector_ip_ops",
        }
    }
}

/// Graph-based (HNSW) index parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswIndex {
    pub name: Option<String>,
    /// Indexed vector column; `None` targets the store's embedding column.
    #[serde(default)]
    pub column: Option<String>,
    pub distance_strategy: DistanceStrategy,
    /// Optional predicate turning this into a partial index.
    pub partial_indexes: Option<String>,
    /// Max connections per layer.
    pub m: u32,
    /// Candidate list size during construction.
    pub ef_construction: u32,
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self {
            name: None,
            column: None,
            distance_strategy: DistanceStrategy::default(),
            partial_indexes: None,
            m: 16,
            ef_construction: 64,
        }
    }
}

impl HnswIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = strategy;
        self
    }

    pub fn with_partial_indexes(mut self, predicate: impl Into<String>) -> Self {
        self.partial_indexes = Some(predicate.into());
        self
    }

    pub fn with_m(mut self, m: u32) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: u32) -> Self {
        self.ef_construction = ef_construction;
        self
    }
}

/// Clustering-based (IVFFlat) index parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfFlatIndex {
    pub name: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    pub distance_strategy: DistanceStrategy,
    pub partial_indexes: Option<String>,
    /// Number of inverted lists (clusters).
    pub lists: u32,
}

impl Default for IvfFlatIndex {
    fn default() -> Self {
        Self {
            name: None,
            column: None,
            distance_strategy: DistanceStrategy::default(),
            partial_indexes: None,
            lists: 100,
        }
    }
}

impl IvfFlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = strategy;
        self
    }

    pub fn with_partial_indexes(mut self, predicate: impl Into<String>) -> Self {
        self.partial_indexes = Some(predicate.into());
        self
    }

    pub fn with_lists(mut self, lists: u32) -> Self {
        self.lists = lists;
        self
    }
}

/// An ANN index configuration for a vector column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "index_type", rename_all = "snake_case")]
pub enum VectorIndex {
    Hnsw(HnswIndex),
    IvfFlat(IvfFlatIndex),
    /// No index: every search is a sequential scan. Applying it drops the
    /// existing vector index.
    ExactNearestNeighbor,
}

impl From<HnswIndex> for VectorIndex {
    fn from(index: HnswIndex) -> Self {
        VectorIndex::Hnsw(index)
    }
}

impl From<IvfFlatIndex> for VectorIndex {
    fn from(index: IvfFlatIndex) -> Self {
        VectorIndex::IvfFlat(index)
    }
}

impl VectorIndex {
    /// Access method name (`hnsw`, `ivfflat`).
    pub fn index_type(&self) -> &'static str {
        match self {
            VectorIndex::Hnsw(_) => "hnsw",
            VectorIndex::IvfFlat(_) => "ivfflat",
            VectorIndex::ExactNearestNeighbor => "exactnearestneighbor",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            VectorIndex::Hnsw(index) => index.name.as_deref(),
            VectorIndex::IvfFlat(index) => index.name.as_deref(),
            VectorIndex::ExactNearestNeighbor => None,
        }
    }

    /// Explicit target column, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            VectorIndex::Hnsw(index) => index.column.as_deref(),
            VectorIndex::IvfFlat(index) => index.column.as_deref(),
            VectorIndex::ExactNearestNeighbor => None,
        }
    }

    pub fn distance_strategy(&self) -> DistanceStrategy {
        match self {
            VectorIndex::Hnsw(index) => index.distance_strategy,
            VectorIndex::IvfFlat(index) => index.distance_strategy,
            VectorIndex::ExactNearestNeighbor => DistanceStrategy::default(),
        }
    }

    pub fn partial_indexes(&self) -> Option<&str> {
        match self {
            VectorIndex::Hnsw(index) => index.partial_indexes.as_deref(),
            VectorIndex::IvfFlat(index) => index.partial_indexes.as_deref(),
            VectorIndex::ExactNearestNeighbor => None,
        }
    }

    /// `(m = 16, ef_construction = 64)` style storage parameters.
    pub fn index_options(&self) -> String {
        match self {
            VectorIndex::Hnsw(index) => {
                format!("(m = {}, ef_construction = {})", index.m, index.ef_construction)
            }
            VectorIndex::IvfFlat(index) => format!("(lists = {})", index.lists),
            VectorIndex::ExactNearestNeighbor => String::new(),
        }
    }

    /// Index name, falling back to `<table><suffix>`.
    pub fn resolved_name(&self, table_name: &str) -> String {
        self.name()
            .map(str::to_string)
            .unwrap_or_else(|| default_index_name(table_name))
    }

    /// Render the `CREATE INDEX` statement. Returns `None` for
    /// [`VectorIndex::ExactNearestNeighbor`], which has nothing to create.
    pub fn create_statement(
        &self,
        name: &str,
        schema_name: &str,
        table_name: &str,
        column: &str,
        concurrently: bool,
    ) -> Option<Statement> {
        if matches!(self, VectorIndex::ExactNearestNeighbor) {
            return None;
        }
        let mut sql = format!(
            "CREATE INDEX {concurrently}{name} ON {table} USING {method} ({column} {ops}) WITH {options}",
            concurrently = if concurrently { "CONCURRENTLY " } else { "" },
            name = quote_ident(name),
            table = qualified_name(schema_name, table_name),
            method = self.index_type(),
            column = quote_ident(column),
            ops = self.distance_strategy().index_function(),
            options = self.index_options(),
        );
        if let Some(predicate) = self.partial_indexes() {
            sql.push_str(&format!(" WHERE ({predicate})"));
        }
        Some(Statement::new(sql))
    }
}

pub fn default_index_name(table_name: &str) -> String {
    format!("{table_name}{DEFAULT_INDEX_NAME_SUFFIX}")
}

/// Per-query index tuning, applied with `SET LOCAL` inside the search transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "index_type", rename_all = "snake_case")]
pub enum QueryOptions {
    /// Size of the dynamic candidate list while searching an HNSW graph.
    Hnsw { ef_search: u32 },
    /// Number of inverted lists probed by an IVFFlat search.
    IvfFlat { probes: u32 },
}

impl QueryOptions {
    pub fn hnsw() -> Self {
        QueryOptions::Hnsw { ef_search: 40 }
    }

    pub fn ivfflat() -> Self {
        QueryOptions::IvfFlat { probes: 1 }
    }

    /// `SET LOCAL` statements to run before the search query.
    pub fn to_statements(&self) -> Vec<Statement> {
        let setting = match self {
            QueryOptions::Hnsw { ef_search } => format!("hnsw.ef_search = {ef_search}"),
            QueryOptions::IvfFlat { probes } => format!("ivfflat.probes = {probes}"),
        };
        vec![Statement::new(format!("SET LOCAL {setting}"))]
    }
}
