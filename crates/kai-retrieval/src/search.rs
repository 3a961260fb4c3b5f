//! Hybrid search: vector and lexical retrieval fused into one ranking.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use kai_core::{
    DocumentStore, KaiError, MetadataFilter, RetrievalConfig, RouteDecision, SearchHit,
    VectorEncoder,
};

use crate::fusion::{apply_route_bonuses, fuse};
use crate::lexical::{extract_keywords, lexical_search};
use crate::vector::{build_filter, VectorSearch};

/// Output of one hybrid search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Fused, route-adjusted hits, best first.
    pub hits: Vec<SearchHit>,
    /// Vector plus lexical hits before fusion.
    pub raw_count: usize,
}

/// Runs both searches concurrently and fuses them.
pub struct HybridSearch {
    store: Arc<dyn DocumentStore>,
    vector: VectorSearch,
    config: RetrievalConfig,
}

impl HybridSearch {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        encoder: Arc<dyn VectorEncoder>,
        config: RetrievalConfig,
    ) -> Self {
        let vector = VectorSearch::new(store.clone(), encoder, config.search_timeout());
        Self {
            store,
            vector,
            config,
        }
    }

    /// Search for `query` within the route's filter.
    pub async fn search(&self, query: &str, route: &RouteDecision) -> SearchOutcome {
        let filter = build_filter(route, &self.config.corpus_source);

        let (vector_hits, lexical_hits) = tokio::join!(
            self.vector.search(query, &filter, self.config.vector_fetch),
            self.lexical(query, &filter)
        );

        let raw_count = vector_hits.len() + lexical_hits.len();
        debug!(
            "Vector search returned {} results, lexical search returned {} results",
            vector_hits.len(),
            lexical_hits.len()
        );

        let fused = fuse(vector_hits, lexical_hits, self.config.fused_top_k);
        let hits = apply_route_bonuses(fused, route);

        debug!("Fused to {} results", hits.len());
        SearchOutcome { hits, raw_count }
    }

    async fn lexical(&self, query: &str, filter: &MetadataFilter) -> Vec<SearchHit> {
        let keywords = extract_keywords(query);
        if keywords.is_empty() {
            return Vec::new();
        }

        let timeout = self.config.search_timeout();
        let candidates = match tokio::time::timeout(timeout, self.store.get(filter)).await {
            Ok(Ok(docs)) => docs,
            Ok(Err(e)) => {
                warn!("Lexical candidate fetch failed: {}", e);
                return Vec::new();
            }
            Err(_) => {
                warn!("{}", KaiError::timeout("lexical candidate fetch", millis(timeout)));
                return Vec::new();
            }
        };

        lexical_search(candidates, &keywords, self.config.lexical_fetch)
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_core::{
        meta, Document, EncodeTask, HitOrigin, SearchIntent, SearchLevel, SearchScope,
    };
    use kai_embed::MockEncoder;
    use kai_store::SqliteStore;

    fn route(scope: SearchScope) -> RouteDecision {
        RouteDecision {
            search_scope: scope,
            search_level: SearchLevel::General,
            target_entity: None,
            search_intent: SearchIntent::Info,
            enhancement_keywords: Vec::new(),
            confidence: 0.5,
            reasoning: String::new(),
            needs_search: true,
        }
    }

    async fn setup(encoder: Arc<MockEncoder>) -> HybridSearch {
        let store = SqliteStore::open_memory().unwrap();
        let docs = vec![
            Document::new("kit", "Кафедра комп'ютерних інформаційних технологій оголошує набір")
                .with_meta(meta::SOURCE, "news")
                .with_meta(meta::FACULTY, "ФКНТ")
                .with_meta(meta::TITLE, "Набір на кафедру КІТ"),
            Document::new("sport", "Турнір з волейболу серед студентів")
                .with_meta(meta::SOURCE, "news")
                .with_meta(meta::FACULTY, "ФАЕТ")
                .with_meta(meta::TITLE, "Волейбол"),
        ];
        let texts: Vec<String> = docs.iter().map(|d| EncodeTask::Passage.apply(&d.content)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = encoder.encode(&refs, EncodeTask::Passage).await.unwrap();
        store.upsert(&docs, &embeddings).await.unwrap();
        HybridSearch::new(Arc::new(store), encoder, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_hybrid_hit_ranks_first() {
        let search = setup(Arc::new(MockEncoder::new())).await;
        let outcome = search.search("набір кафедра", &route(SearchScope::Global)).await;
        assert!(!outcome.hits.is_empty());
        assert_eq!(outcome.hits[0].document.id, "kit");
        assert_eq!(outcome.hits[0].origin, HitOrigin::Hybrid);
        assert!(outcome.raw_count >= outcome.hits.len());
    }

    #[tokio::test]
    async fn test_scope_filters_both_signals() {
        let search = setup(Arc::new(MockEncoder::new())).await;
        let outcome = search
            .search("турнір волейбол", &route(SearchScope::Faculty("ФКНТ".into())))
            .await;
        assert!(outcome.hits.iter().all(|h| h.document.id == "kit"));
    }

    #[tokio::test]
    async fn test_lexical_survives_encoder_failure() {
        let encoder = Arc::new(MockEncoder::new());
        let search = setup(encoder.clone()).await;
        encoder.set_failing(true);
        let outcome = search.search("волейбол турнір", &route(SearchScope::Global)).await;
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].document.id, "sport");
        assert_eq!(outcome.hits[0].origin, HitOrigin::Lexical);
    }

    #[tokio::test]
    async fn test_nothing_matches() {
        let search = setup(Arc::new(MockEncoder::new())).await;
        let outcome = search
            .search("бюджет", &route(SearchScope::Faculty("ФЕБ".into())))
            .await;
        assert!(outcome.hits.is_empty());
        assert_eq!(outcome.raw_count, 0);
    }
}
