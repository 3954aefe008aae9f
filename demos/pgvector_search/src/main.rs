use std::sync::Arc;

use cloudsql_embeddings::FakeEmbeddings;
use cloudsql_pg::{
    CloudSqlError, Column, Document, HnswIndex, MmrOptions, PoolConfig, PostgresEngine,
    PostgresVectorStore, PostgresVectorStoreConfig, QueryExecutor, QueryOptions,
    VectorStoreTableArgs,
};

const TABLE: &str = "demo_documents";
const DIMS: u32 = 16;

#[tokio::main]
async fn main() -> Result<(), CloudSqlError> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("DATABASE_URL").map_err(|_| {
        CloudSqlError::Configuration("set DATABASE_URL to a postgres:// connection string".into())
    })?;
    let engine = PostgresEngine::from_url(&url, PoolConfig::default())?;
    engine.test_connection().await?;

    // --- Provision table ---
    println!("=== Creating Table ===");
    engine
        .init_vectorstore_table(
            TABLE,
            DIMS,
            VectorStoreTableArgs::new()
                .with_metadata_columns(vec![Column::new("topic", "TEXT")])
                .with_overwrite_existing(true),
        )
        .await?;

    let store = PostgresVectorStore::create(
        Arc::new(engine.clone()),
        Arc::new(FakeEmbeddings::new(DIMS as usize)),
        TABLE,
        PostgresVectorStoreConfig::new().with_index_query_options(QueryOptions::hnsw()),
    )
    .await?;

    // --- Insert ---
    println!("\n=== Adding Documents ===");
    let docs = vec![
        Document::new("", "Rust is a systems programming language")
            .with_metadata_entry("topic", "rust"),
        Document::new("", "Rust has fearless concurrency").with_metadata_entry("topic", "rust"),
        Document::new("", "Python is great for data science")
            .with_metadata_entry("topic", "python")
            .with_metadata_entry("year", 1991),
    ];
    let ids = store.add_documents(docs, None).await?;
    println!("Inserted {} documents", ids.len());

    // --- Index ---
    store.apply_vector_index(HnswIndex::default(), true).await?;
    println!("HNSW index valid: {}", store.is_valid_index(None).await?);

    // --- Search ---
    println!("\n=== Similarity Search ===");
    for (doc, distance) in store
        .similarity_search_with_score("Rust concurrency", 2, None)
        .await?
    {
        println!("  {distance:.4}  {}  {}", doc.content, serde_json::json!(doc.metadata));
    }

    println!("\n=== Filtered Search ===");
    for doc in store
        .similarity_search("language", 3, Some("topic = 'python'"))
        .await?
    {
        println!("  {}", doc.content);
    }

    println!("\n=== MMR Search ===");
    let options = MmrOptions::new(2).with_fetch_k(3).with_lambda_mult(0.25);
    for doc in store.max_marginal_relevance_search("Rust", &options).await? {
        println!("  {}", doc.content);
    }

    store.drop_vector_index(None).await?;
    engine.close().await;
    Ok(())
}
