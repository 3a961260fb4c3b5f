//! Vector search adapter over the encoder and the document store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use kai_core::tuning::vector::RELEVANCE_SCALE;
use kai_core::{
    meta, DocumentStore, EncodeTask, HitOrigin, KaiError, MetadataFilter, Result, RouteDecision,
    SearchHit, SearchIntent, VectorEncoder,
};

/// Category constraint implied by an intent, if any.
pub fn intent_category(intent: SearchIntent) -> Option<&'static str> {
    match intent {
        SearchIntent::Schedule => Some("schedule"),
        SearchIntent::Events => Some("conferences"),
        SearchIntent::Contacts => Some("contacts"),
        SearchIntent::News | SearchIntent::Info => None,
    }
}

/// Conjunctive filter for one route: corpus source, then faculty, department
/// and category when the route pins them.
pub fn build_filter(route: &RouteDecision, corpus_source: &str) -> MetadataFilter {
    let mut filter = MetadataFilter::new().equals(meta::SOURCE, corpus_source);
    if let Some(faculty) = route.search_scope.faculty() {
        filter = filter.equals(meta::FACULTY, faculty);
    }
    if let Some(department) = route.target_entity.as_deref() {
        filter = filter.equals(meta::DEPARTMENT, department);
    }
    if let Some(category) = intent_category(route.search_intent) {
        filter = filter.equals(meta::CATEGORY, category);
    }
    filter
}

/// `max(0, 1 - d / 4)`.
pub fn relevance_from_distance(distance: f32) -> f32 {
    (1.0 - distance / RELEVANCE_SCALE).max(0.0)
}

/// Semantic search. Failures degrade to an empty result.
pub struct VectorSearch {
    store: Arc<dyn DocumentStore>,
    encoder: Arc<dyn VectorEncoder>,
    call_timeout: Duration,
}

impl VectorSearch {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        encoder: Arc<dyn VectorEncoder>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            encoder,
            call_timeout,
        }
    }

    /// Up to `max_results` nearest documents matching `filter`.
    pub async fn search(
        &self,
        query_text: &str,
        filter: &MetadataFilter,
        max_results: usize,
    ) -> Vec<SearchHit> {
        match self.try_search(query_text, filter, max_results).await {
            Ok(hits) => {
                debug!("Vector search [{}] returned {} hits", filter, hits.len());
                hits
            }
            Err(e) => {
                warn!("Vector search failed, continuing without it: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        query_text: &str,
        filter: &MetadataFilter,
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        if query_text.trim().is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let prefixed = EncodeTask::Query.apply(query_text);
        let millis = self.call_timeout.as_millis() as u64;

        let embeddings = tokio::time::timeout(
            self.call_timeout,
            self.encoder.encode(&[prefixed.as_str()], EncodeTask::Query),
        )
        .await
        .map_err(|_| KaiError::timeout("query encoding", millis))??;

        let vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| KaiError::encoder("encoder returned no embedding"))?;

        let rows = tokio::time::timeout(
            self.call_timeout,
            self.store.query(&vector, filter, max_results),
        )
        .await
        .map_err(|_| KaiError::timeout("vector query", millis))??;

        Ok(rows
            .into_iter()
            .map(|(document, distance)| SearchHit {
                document,
                distance,
                relevance_score: relevance_from_distance(distance),
                origin: HitOrigin::Vector,
            })
            .collect())
    }
}
