//! Result validator: judges fused hits and proposes reformulations.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use kai_core::tuning::validator::{FALLBACK_CONFIDENCE, FALLBACK_SELECTION, PREVIEW_CHARS};
use kai_core::{
    meta, ReasoningService, ReformulationStrategy, SearchHit, TurnMessage, ValidationDecision,
};

use crate::structured::{complete_structured, RetryPolicy, StructuredOutcome, StructuredReply};

const UNTITLED: &str = "Без заголовка";
const NOT_SET: &str = "Не вказано";

const SYSTEM_PROMPT: &str = r#"You validate search results for the National Aviation University (NAU) assistant.

Decide whether the numbered results actually answer the user's question and
match what the router expected (topic, person, event, faculty, department).
Select up to 3 of the best results by their number.

When nothing is relevant, rewrite the query for embedding search. Simpler and
more general queries work better: keep names and topics, drop filler such as
"контакти" or "інформація". Name the strategy you used:
  "enrich_person"    add role words (викладач, доцент, професор, завідувач)
  "enrich_event"     add event words (подія, захід, конференція, семінар)
  "enrich_contacts"  add contact words (контакти, email, телефон)
  "generalize_topic" drop narrow details, keep the core topic
  "expand_scope"     widen from a department to its faculty or the university
  "add_synonyms"     add topic synonyms

Reply with ONE JSON object and nothing else. Fields, in this order:
  "reasoning": your analysis (always first),
  "is_relevant": true | false,
  "selected_indices": result numbers, e.g. [1, 2],
  "confidence": number between 0 and 1,
  "needs_reformulation": true | false,
  "reformulated_query": new query text, or null,
  "reformulation_strategy": one of the strategies above, or null"#;

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    reasoning: String,
    is_relevant: bool,
    #[serde(default)]
    selected_indices: Vec<i64>,
    confidence: f32,
    #[serde(default)]
    needs_reformulation: bool,
    #[serde(default)]
    reformulated_query: Option<String>,
    #[serde(default)]
    reformulation_strategy: Option<ReformulationStrategy>,
}

impl StructuredReply for ModelVerdict {
    fn check(&self) -> Result<(), String> {
        if !self.confidence.is_finite() {
            return Err("confidence is not a number".to_string());
        }
        Ok(())
    }
}

/// What the orchestrator should do with one validated attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Use these hits as evidence.
    Accept(Vec<SearchHit>),
    /// Search again with a new query.
    Reformulate {
        query: String,
        strategy: Option<ReformulationStrategy>,
    },
    /// Stop. Carries whatever was selected, possibly nothing.
    GiveUp(Vec<SearchHit>),
}

/// Result of one validation pass.
#[derive(Debug, Clone)]
pub struct Validation {
    pub decision: ValidationDecision,
    pub verdict: Verdict,
    /// Whether the permissive default replaced the model's judgement.
    pub fallback: bool,
}

pub struct ResultValidator {
    reasoner: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
}

impl ResultValidator {
    pub fn new(reasoner: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self { reasoner, policy }
    }

    /// Judge `hits` for `question` on attempt `attempt` of `budget`.
    pub async fn validate(
        &self,
        question: &str,
        hits: &[SearchHit],
        route_reasoning: &str,
        attempt: u32,
        budget: u32,
    ) -> Validation {
        if hits.is_empty() {
            let decision = ValidationDecision {
                is_relevant: false,
                selected_indices: Vec::new(),
                confidence: 0.0,
                reasoning: "Немає результатів для перевірки".to_string(),
                needs_reformulation: false,
                reformulated_query: None,
                reformulation_strategy: None,
            };
            return Validation {
                decision,
                verdict: Verdict::GiveUp(Vec::new()),
                fallback: false,
            };
        }

        let messages = vec![TurnMessage::user(user_message(
            question,
            hits,
            route_reasoning,
            attempt,
            budget,
        ))];

        match complete_structured::<ModelVerdict>(self.reasoner.as_ref(), SYSTEM_PROMPT, &messages, self.policy)
            .await
        {
            StructuredOutcome::Parsed { value, .. } => {
                let validation = interpret(value, hits, attempt, budget);
                debug!(
                    "Validator: relevant={}, selected={:?}, reformulate={}",
                    validation.decision.is_relevant,
                    validation.decision.selected_indices,
                    validation.decision.needs_reformulation
                );
                validation
            }
            StructuredOutcome::Unparseable { attempts, last_error } => {
                warn!(
                    "Validation failed after {} attempt(s) ({}); accepting top results",
                    attempts, last_error
                );
                permissive_default(hits)
            }
        }
    }
}

/// One block per hit: number, title, organization, category, preview, score.
pub fn condensed_view(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let doc = &hit.document;
            let field = |key: &str| doc.meta_text(key).unwrap_or_else(|| NOT_SET.to_string());
            format!(
                "РЕЗУЛЬТАТ #{}:\nЗаголовок: {}\nФакультет: {}\nКафедра: {}\nКатегорія: {}\nТип: {}\nРелевантність: {:.2}\nТип пошуку: {}\nПревью: {}",
                i + 1,
                doc.title().unwrap_or_else(|| UNTITLED.to_string()),
                field(meta::FACULTY),
                field(meta::DEPARTMENT),
                field(meta::CATEGORY),
                field(meta::NEWS_TYPE),
                hit.relevance_score,
                hit.origin,
                preview(&doc.content),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let cut: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        content.to_string()
    }
}

fn user_message(question: &str, hits: &[SearchHit], route_reasoning: &str, attempt: u32, budget: u32) -> String {
    format!(
        "ЗАПИТ КОРИСТУВАЧА: \"{}\"\n\nЩО ОЧІКУЄТЬСЯ (маршрутизатор):\n{}\n\nСПРОБА ПОШУКУ: {} з {}\n\nРЕЗУЛЬТАТИ ({} документів):\n\n{}",
        question,
        route_reasoning,
        attempt,
        budget,
        hits.len(),
        condensed_view(hits)
    )
}

/// In-range 1-based indices, first occurrence kept.
fn valid_indices(raw: &[i64], len: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|&i| usize::try_from(i).ok())
        .filter(|&i| (1..=len).contains(&i) && seen.insert(i))
        .collect()
}

fn interpret(raw: ModelVerdict, hits: &[SearchHit], attempt: u32, budget: u32) -> Validation {
    let selected_indices = valid_indices(&raw.selected_indices, hits.len());
    let selected: Vec<SearchHit> = selected_indices.iter().map(|&i| hits[i - 1].clone()).collect();

    let reformulated_query = raw
        .reformulated_query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    // A query without the flag, or the flag without a query, is not a request.
    let needs_reformulation = raw.needs_reformulation && reformulated_query.is_some();

    // Relevant with nothing usable selected counts as not relevant.
    let is_relevant = raw.is_relevant && !selected.is_empty();

    let verdict = if is_relevant {
        Verdict::Accept(selected)
    } else {
        match &reformulated_query {
            Some(query) if needs_reformulation && attempt < budget => Verdict::Reformulate {
                query: query.clone(),
                strategy: raw.reformulation_strategy.clone(),
            },
            _ => Verdict::GiveUp(selected),
        }
    };

    let decision = ValidationDecision {
        is_relevant,
        selected_indices,
        confidence: raw.confidence.clamp(0.0, 1.0),
        reasoning: raw.reasoning,
        needs_reformulation,
        reformulated_query,
        reformulation_strategy: raw.reformulation_strategy,
    };

    Validation {
        decision,
        verdict,
        fallback: false,
    }
}

/// Accept the first few hits when the model cannot be consulted.
pub fn permissive_default(hits: &[SearchHit]) -> Validation {
    let n = hits.len().min(FALLBACK_SELECTION);
    let decision = ValidationDecision {
        is_relevant: n > 0,
        selected_indices: (1..=n).collect(),
        confidence: FALLBACK_CONFIDENCE,
        reasoning: "Валідатор недоступний, взято перші результати".to_string(),
        needs_reformulation: false,
        reformulated_query: None,
        reformulation_strategy: None,
    };
    let selected = hits[..n].to_vec();
    let verdict = if n > 0 {
        Verdict::Accept(selected)
    } else {
        Verdict::GiveUp(selected)
    };
    Validation {
        decision,
        verdict,
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_core::{Document, HitOrigin};
    use kai_reason::{MockReasoner, MockReply};
    use serde_json::json;
    use std::time::Duration;

    fn hits(n: usize) -> Vec<SearchHit> {
        (1..=n)
            .map(|i| SearchHit {
                document: Document::new(format!("d{}", i), "х".repeat(200))
                    .with_meta(meta::TITLE, format!("Новина {}", i))
                    .with_meta(meta::FACULTY, "ФКНТ"),
                distance: 0.1,
                relevance_score: 100.0 - i as f32,
                origin: HitOrigin::Hybrid,
            })
            .collect()
    }

    fn validator(mock: MockReasoner) -> (ResultValidator, Arc<MockReasoner>) {
        let mock = Arc::new(mock);
        let v = ResultValidator::new(mock.clone(), RetryPolicy::new(3, Duration::from_millis(200)));
        (v, mock)
    }

    fn verdict(relevant: bool, selected: Vec<i64>, reformulated: Option<&str>) -> MockReply {
        MockReply::json(json!({
            "reasoning": "аналіз",
            "is_relevant": relevant,
            "selected_indices": selected,
            "confidence": 0.8,
            "needs_reformulation": reformulated.is_some(),
            "reformulated_query": reformulated,
            "reformulation_strategy": reformulated.map(|_| "enrich_person"),
        }))
    }

    #[tokio::test]
    async fn test_accept_maps_indices_and_drops_out_of_range() {
        let (v, _) = validator(MockReasoner::new(vec![verdict(true, vec![2, 9, 0, -1, 2], None)]));
        let hs = hits(3);
        let out = v.validate("питання", &hs, "очікування", 1, 3).await;
        assert_eq!(out.decision.selected_indices, vec![2]);
        assert_eq!(out.verdict, Verdict::Accept(vec![hs[1].clone()]));
        assert!(!out.fallback);
    }

    #[tokio::test]
    async fn test_reformulate_when_budget_remains() {
        let (v, _) = validator(MockReasoner::new(vec![verdict(false, vec![], Some("Іванов викладач"))]));
        let out = v.validate("контакти Іванова", &hits(2), "", 1, 3).await;
        assert_eq!(
            out.verdict,
            Verdict::Reformulate {
                query: "Іванов викладач".into(),
                strategy: Some(ReformulationStrategy::EnrichPerson),
            }
        );
        assert!(out.decision.needs_reformulation);
    }

    #[tokio::test]
    async fn test_no_reformulation_on_last_attempt() {
        let (v, _) = validator(MockReasoner::new(vec![verdict(false, vec![1], Some("інше"))]));
        let hs = hits(2);
        let out = v.validate("q", &hs, "", 3, 3).await;
        assert_eq!(out.verdict, Verdict::GiveUp(vec![hs[0].clone()]));
        // The request is recorded even though no attempt is left for it
        assert!(out.decision.needs_reformulation);
    }

    #[tokio::test]
    async fn test_query_without_reformulation_flag_gives_up() {
        let (v, _) = validator(MockReasoner::new(vec![MockReply::json(json!({
            "reasoning": "нічого про це",
            "is_relevant": false,
            "selected_indices": [],
            "confidence": 0.4,
            "needs_reformulation": false,
            "reformulated_query": "волейбол",
            "reformulation_strategy": null,
        }))]));
        let out = v.validate("q", &hits(2), "", 1, 3).await;
        assert_eq!(out.verdict, Verdict::GiveUp(Vec::new()));
        assert!(!out.decision.needs_reformulation);
        assert_eq!(out.decision.reformulated_query.as_deref(), Some("волейбол"));
    }

    #[tokio::test]
    async fn test_flag_without_query_gives_up() {
        let (v, _) = validator(MockReasoner::new(vec![MockReply::json(json!({
            "reasoning": "треба інакше",
            "is_relevant": false,
            "selected_indices": [],
            "confidence": 0.4,
            "needs_reformulation": true,
            "reformulated_query": "  ",
        }))]));
        let out = v.validate("q", &hits(2), "", 1, 3).await;
        assert_eq!(out.verdict, Verdict::GiveUp(Vec::new()));
        assert!(!out.decision.needs_reformulation);
    }

    #[tokio::test]
    async fn test_relevant_without_valid_selection_is_not_relevant() {
        let (v, _) = validator(MockReasoner::new(vec![verdict(true, vec![7], None)]));
        let out = v.validate("q", &hits(2), "", 1, 3).await;
        assert!(!out.decision.is_relevant);
        assert_eq!(out.verdict, Verdict::GiveUp(Vec::new()));
    }

    #[tokio::test]
    async fn test_permissive_default_after_malformed_output() {
        let (v, mock) = validator(MockReasoner::always(MockReply::text("Результати релевантні.")));
        let hs = hits(5);
        let out = v.validate("q", &hs, "", 1, 3).await;
        assert_eq!(mock.calls(), 3);
        assert!(out.fallback);
        assert!(out.decision.is_relevant);
        assert_eq!(out.decision.selected_indices, vec![1, 2, 3]);
        assert_eq!(out.decision.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(out.verdict, Verdict::Accept(hs[..3].to_vec()));
    }

    #[tokio::test]
    async fn test_empty_hits_skip_the_model() {
        let (v, mock) = validator(MockReasoner::unavailable());
        let out = v.validate("q", &[], "", 1, 3).await;
        assert_eq!(out.verdict, Verdict::GiveUp(Vec::new()));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_carries_attempt_and_view() {
        let (v, mock) = validator(MockReasoner::new(vec![verdict(true, vec![1], None)]));
        v.validate("Хто декан?", &hits(1), "Декан ФКНТ", 2, 3).await;
        let content = &mock.requests()[0].messages[0].content;
        assert!(content.contains("СПРОБА ПОШУКУ: 2 з 3"));
        assert!(content.contains("Декан ФКНТ"));
        assert!(content.contains("РЕЗУЛЬТАТ #1:"));
        assert!(content.contains("Кафедра: Не вказано"));
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        let view = condensed_view(&hits(1));
        let expected = format!("Превью: {}...", "х".repeat(PREVIEW_CHARS));
        assert!(view.contains(&expected));
        assert!(view.contains("Тип пошуку: hybrid"));
    }
}
