//! Score-based fusion of vector and lexical hits.

use std::collections::{HashMap, HashSet};

use kai_core::tuning::fusion::{
    DISTANCE_CEILING, DISTANCE_WEIGHT, HYBRID_LEXICAL_WEIGHT, LEXICAL_ONLY_WEIGHT, RANK_HORIZON,
    RANK_WEIGHT, ROUTE_BONUS,
};
use kai_core::{meta, HitOrigin, RouteDecision, SearchHit};

/// Seed score of the vector hit at 0-based `rank` with distance `d`:
/// `max(0, (2 - d) * 50) + max(0, (10 - rank) * 5)`.
pub fn vector_seed(distance: f32, rank: usize) -> f32 {
    let closeness = ((DISTANCE_CEILING - distance) * DISTANCE_WEIGHT).max(0.0);
    let position = ((RANK_HORIZON - rank as f32) * RANK_WEIGHT).max(0.0);
    closeness + position
}

fn sort_desc(hits: &mut [SearchHit]) {
    // Stable: ties keep insertion order.
    hits.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Merge both hit lists into one ranking keyed by document id.
///
/// Vector hits are seeded by distance and rank. A lexical hit for a document
/// already present adds twice its lexical score and turns the hit hybrid;
/// otherwise it enters with three times its lexical score. Each document
/// appears once; the result is sorted descending and cut to `top_k`.
pub fn fuse(vector_hits: Vec<SearchHit>, lexical_hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    let mut fused: Vec<SearchHit> = Vec::with_capacity(vector_hits.len() + lexical_hits.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        if index.contains_key(&hit.document.id) {
            continue;
        }
        index.insert(hit.document.id.clone(), fused.len());
        fused.push(SearchHit {
            relevance_score: vector_seed(hit.distance, rank),
            origin: HitOrigin::Vector,
            ..hit
        });
    }

    let mut seen_lexical: HashSet<String> = HashSet::new();
    for hit in lexical_hits {
        if !seen_lexical.insert(hit.document.id.clone()) {
            continue;
        }
        match index.get(&hit.document.id) {
            Some(&i) => {
                let existing = &mut fused[i];
                existing.relevance_score += hit.relevance_score * HYBRID_LEXICAL_WEIGHT;
                existing.origin = HitOrigin::Hybrid;
            }
            None => {
                index.insert(hit.document.id.clone(), fused.len());
                fused.push(SearchHit {
                    relevance_score: hit.relevance_score * LEXICAL_ONLY_WEIGHT,
                    origin: HitOrigin::Lexical,
                    ..hit
                });
            }
        }
    }

    sort_desc(&mut fused);
    fused.truncate(top_k);
    fused
}

/// Nudge hits that match the route's organizational target, then re-sort.
///
/// +0.1 when the hit's faculty equals a non-global scope, +0.1 when its
/// department equals the target entity.
pub fn apply_route_bonuses(mut hits: Vec<SearchHit>, route: &RouteDecision) -> Vec<SearchHit> {
    let faculty = route.search_scope.faculty();
    let department = route.target_entity.as_deref();
    if faculty.is_none() && department.is_none() {
        return hits;
    }

    for hit in &mut hits {
        if let Some(f) = faculty {
            if hit.document.meta_text(meta::FACULTY).as_deref() == Some(f) {
                hit.relevance_score += ROUTE_BONUS;
            }
        }
        if let Some(d) = department {
            if hit.document.meta_text(meta::DEPARTMENT).as_deref() == Some(d) {
                hit.relevance_score += ROUTE_BONUS;
            }
        }
    }

    sort_desc(&mut hits);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_core::{Document, SearchIntent, SearchLevel, SearchScope};

    fn hit(id: &str, distance: f32, score: f32, origin: HitOrigin) -> SearchHit {
        SearchHit {
            document: Document::new(id, format!("content {}", id)),
            distance,
            relevance_score: score,
            origin,
        }
    }

    fn route(scope: SearchScope, target: Option<&str>) -> RouteDecision {
        RouteDecision {
            search_scope: scope,
            search_level: SearchLevel::Faculty,
            target_entity: target.map(String::from),
            search_intent: SearchIntent::Info,
            enhancement_keywords: Vec::new(),
            confidence: 0.9,
            reasoning: String::new(),
            needs_search: true,
        }
    }

    #[test]
    fn test_vector_seed() {
        assert_eq!(vector_seed(0.0, 0), 100.0 + 50.0);
        assert_eq!(vector_seed(0.5, 2), 75.0 + 40.0);
        // Past both horizons nothing is left.
        assert_eq!(vector_seed(2.5, 12), 0.0);
    }

    #[test]
    fn test_hybrid_and_lexical_only() {
        let vector = vec![hit("a", 0.5, 0.8, HitOrigin::Vector), hit("b", 1.0, 0.7, HitOrigin::Vector)];
        let lexical = vec![hit("b", 0.0, 10.0, HitOrigin::Lexical), hit("c", 0.0, 40.0, HitOrigin::Lexical)];

        let fused = fuse(vector, lexical, 10);
        assert_eq!(fused.len(), 3);

        let by_id = |id: &str| fused.iter().find(|h| h.document.id == id).unwrap();
        assert_eq!(by_id("a").relevance_score, 75.0 + 50.0);
        assert_eq!(by_id("a").origin, HitOrigin::Vector);
        assert_eq!(by_id("b").relevance_score, 50.0 + 45.0 + 20.0);
        assert_eq!(by_id("b").origin, HitOrigin::Hybrid);
        assert_eq!(by_id("c").relevance_score, 120.0);
        assert_eq!(by_id("c").origin, HitOrigin::Lexical);

        let ids: Vec<&str> = fused.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_fuse_unique_ids_and_truncation() {
        let vector = vec![hit("a", 0.1, 0.9, HitOrigin::Vector), hit("a", 0.2, 0.9, HitOrigin::Vector)];
        let lexical = vec![
            hit("x", 0.0, 5.0, HitOrigin::Lexical),
            hit("x", 0.0, 5.0, HitOrigin::Lexical),
            hit("y", 0.0, 1.0, HitOrigin::Lexical),
        ];
        let fused = fuse(vector, lexical, 2);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].document.id, "a");
        assert_eq!(fused[1].document.id, "x");
        assert_eq!(fused[1].relevance_score, 15.0);
    }

    #[test]
    fn test_fuse_empty_inputs() {
        assert!(fuse(Vec::new(), Vec::new(), 15).is_empty());
        let only_lexical = fuse(Vec::new(), vec![hit("l", 0.0, 2.0, HitOrigin::Lexical)], 15);
        assert_eq!(only_lexical[0].relevance_score, 6.0);
    }

    #[test]
    fn test_route_bonus_reorders() {
        let mut a = hit("a", 0.0, 10.0, HitOrigin::Vector);
        let mut b = hit("b", 0.0, 9.95, HitOrigin::Vector);
        let c = hit("c", 0.0, 5.0, HitOrigin::Vector);
        a.document = a.document.with_meta(meta::FACULTY, "ФАЕТ");
        b.document = b
            .document
            .with_meta(meta::FACULTY, "ФКНТ")
            .with_meta(meta::DEPARTMENT, "ІПЗ");

        let out = apply_route_bonuses(vec![a, b, c], &route(SearchScope::Faculty("ФКНТ".into()), Some("ІПЗ")));
        let ids: Vec<&str> = out.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!((out[0].relevance_score - 10.15).abs() < 1e-4);
    }

    #[test]
    fn test_route_bonus_on_top_hit_keeps_order() {
        let a = hit("a", 0.0, 10.0, HitOrigin::Vector);
        let mut b = hit("b", 0.0, 30.0, HitOrigin::Hybrid);
        let c = hit("c", 0.0, 5.0, HitOrigin::Lexical);
        b.document = b.document.with_meta(meta::DEPARTMENT, "КІТ");

        let out = apply_route_bonuses(vec![a, b, c], &route(SearchScope::Faculty("ФКНТ".into()), Some("КІТ")));
        let ids: Vec<&str> = out.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!((out[0].relevance_score - 30.1).abs() < 1e-4);
    }

    #[test]
    fn test_route_bonus_global_scope_no_target() {
        let mut a = hit("a", 0.0, 1.0, HitOrigin::Vector);
        a.document = a.document.with_meta(meta::FACULTY, "ФКНТ");
        let out = apply_route_bonuses(vec![a], &route(SearchScope::Global, None));
        assert_eq!(out[0].relevance_score, 1.0);
    }
}
