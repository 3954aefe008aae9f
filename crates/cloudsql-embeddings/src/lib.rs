mod fake;

pub use fake::FakeEmbeddings;

// Re-export the Embeddings trait from core.
pub use cloudsql_core::Embeddings;
