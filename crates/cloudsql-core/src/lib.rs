use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for the cloudsql crates, one variant per failure class.
#[derive(Debug, Error)]
pub enum CloudSqlError {
    /// Contradictory or invalid construction arguments.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Caller-supplied inputs that do not line up (e.g. collection sizes).
    #[error("validation error: {0}")]
    Validation(String),
    /// The target object already exists and replacement was not requested.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Connection or network failure surfaced from the executor. Never retried here.
    #[error("transient error: {0}")]
    Transient(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("memory error: {0}")]
    Memory(String),
}

impl CloudSqlError {
    /// Whether the failure came from the connection layer and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudSqlError::Transient(_) | CloudSqlError::Timeout(_))
    }
}

impl From<serde_json::Error> for CloudSqlError {
    fn from(err: serde_json::Error) -> Self {
        CloudSqlError::Serialization(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A piece of text with metadata, as stored in and returned from a vector store.
///
/// An empty `id` means "not yet assigned"; stores generate one on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    /// Add a single metadata entry, builder style.
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message as persisted by chat-history stores.
///
/// Serialized with an internal `type` tag (`"system"`, `"human"`, `"ai"`,
/// `"tool"`), which is also the value stored in a history table's `type`
/// column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    Human {
        content: String,
    },
    Ai {
        content: String,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Message::Ai {
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::Human { content }
            | Message::Ai { content }
            | Message::Tool { content, .. } => content,
        }
    }

    /// The serde tag of this message.
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::Human { .. } => "human",
            Message::Ai { .. } => "ai",
            Message::Tool { .. } => "tool",
        }
    }
}

// ---------------------------------------------------------------------------
// Embeddings trait
// ---------------------------------------------------------------------------

/// Trait for embedding text into vectors.
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Embed multiple texts. The result is length- and order-preserving.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CloudSqlError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, CloudSqlError>;
}

// ---------------------------------------------------------------------------
// VectorStore trait
// ---------------------------------------------------------------------------

/// Trait for vector storage backends that own their embedder.
///
/// `filter` is an opaque backend-specific predicate passed through verbatim.
/// Distances follow the backend's configured strategy: lower is closer.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and add documents. Returns the ids used, in input order.
    async fn add_documents(
        &self,
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, CloudSqlError>;

    /// Add documents with pre-computed embeddings.
    async fn add_vectors(
        &self,
        vectors: Vec<Vec<f32>>,
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, CloudSqlError>;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Document>, CloudSqlError>;

    /// Search returning `(document, distance)` pairs, nearest first.
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError>;

    /// Search by a pre-computed embedding vector instead of a text query.
    async fn similarity_search_by_vector_with_score(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(Document, f32)>, CloudSqlError>;

    /// Delete documents by id. An empty slice deletes nothing.
    async fn delete(&self, ids: &[&str]) -> Result<bool, CloudSqlError>;
}

// ---------------------------------------------------------------------------
// MemoryStore trait
// ---------------------------------------------------------------------------

/// Trait for persisting conversation messages, keyed by session id.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(&self, session_id: &str, message: Message) -> Result<(), CloudSqlError>;
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, CloudSqlError>;
    async fn clear(&self, session_id: &str) -> Result<(), CloudSqlError>;
}
