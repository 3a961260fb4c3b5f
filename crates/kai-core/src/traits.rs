//! Collaborator interfaces the retrieval pipeline depends on.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Document, MetadataFilter, StoreStats, TurnMessage};

/// Text-completion service used for routing and validation.
///
/// One request per call. Implementations must not keep conversation state
/// between calls; everything the model needs is in `messages`.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, system_prompt: &str, messages: &[TurnMessage]) -> Result<String>;

    /// Cheap reachability check, without a completion.
    async fn health(&self) -> Result<()> {
        Ok(())
    }

    /// Short identifier for logs.
    fn name(&self) -> &str;
}

/// Encoding mode for asymmetric retrieval models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeTask {
    Query,
    Passage,
}

impl EncodeTask {
    /// Marker prepended to text before encoding.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Query => "query: ",
            Self::Passage => "passage: ",
        }
    }

    /// Prepend the task marker unless the text already carries it.
    pub fn apply(&self, text: &str) -> String {
        let prefix = self.prefix();
        if text.starts_with(prefix) {
            text.to_string()
        } else {
            format!("{}{}", prefix, text)
        }
    }
}

/// Vector encoder. Texts arrive already prefixed via [`EncodeTask::apply`];
/// the task is passed along for models that take it as an input.
#[async_trait]
pub trait VectorEncoder: Send + Sync {
    async fn encode(&self, texts: &[&str], task: EncodeTask) -> Result<Vec<Vec<f32>>>;

    /// Output dimension.
    fn dimension(&self) -> usize;
}

/// Knowledge store with metadata filtering and nearest-neighbour search.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Up to `k` nearest documents matching `filter`, with their distances,
    /// closest first.
    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<(Document, f32)>>;

    /// All documents matching `filter`.
    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<Document>>;

    /// Insert or replace documents with their passage embeddings.
    async fn upsert(&self, documents: &[Document], embeddings: &[Vec<f32>]) -> Result<usize>;

    async fn stats(&self) -> Result<StoreStats>;
}
