//! Query router: model-driven classification with a heuristic fallback.
//!
//! [`QueryRouter::route`] never fails. When the reasoning service is down or
//! keeps producing malformed output, the deterministic heuristic decides.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kai_core::tuning::router::{
    BASELINE_CONFIDENCE, DIRECT_DEPARTMENT_CONFIDENCE, DIRECT_FACULTY_CONFIDENCE,
    GREETING_MAX_WORDS, GROUP_CONFIDENCE, HISTORY_DEPARTMENT_CONFIDENCE, HISTORY_FACULTY_CONFIDENCE,
    HISTORY_WINDOW, INTENT_TERMS, MAX_ENHANCEMENT_KEYWORDS, SYNONYM_TERMS,
};
use kai_core::{
    EntityIndex, EntityKind, ReasoningService, Role, RouteDecision, SearchIntent, SearchLevel,
    SearchScope, TurnMessage,
};

use crate::structured::{complete_structured, RetryPolicy, StructuredOutcome, StructuredReply};

/// Which path produced a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteOrigin {
    Model,
    Heuristic,
}

/// Intent keyword sets, checked in this order; first match wins.
const INTENT_PATTERNS: &[(SearchIntent, &[&str])] = &[
    (SearchIntent::Schedule, &["розклад", "пари", "заняття", "коли", "о котрій"]),
    (SearchIntent::News, &["новин", "подій", "останн", "що нового", "актуальн"]),
    (SearchIntent::Contacts, &["контакт", "телефон", "адрес", "email", "де знаходиться"]),
    (SearchIntent::Events, &["захід", "конференція", "семінар", "зустріч", "форум", "політ"]),
];

fn intent_terms(intent: SearchIntent) -> &'static [&'static str] {
    match intent {
        SearchIntent::Schedule => &["графік", "час", "аудиторія"],
        SearchIntent::News => &["подія", "оголошення", "інформація"],
        SearchIntent::Contacts => &["зв'язок", "телефон", "адреса"],
        SearchIntent::Events => &["подія", "зустріч", "захід"],
        SearchIntent::Info => &["інформація", "дані", "відомості"],
    }
}

/// Expansion terms keyed by a substring of the question.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("політ", &["конференція", "захід", "зустріч", "семінар", "форум", "збори"]),
    ("зустріч", &["засідання", "нарада", "конференція", "семінар"]),
    ("подія", &["захід", "конференція", "форум", "семінар", "святкування"]),
    ("викладач", &["професор", "доцент", "завідувач", "науковець", "педагог"]),
    ("завідувач", &["завкафедри", "керівник кафедри", "декан", "професор"]),
    ("навчання", &["освіта", "заняття", "пари", "лекції", "семінари", "курс"]),
    ("розклад", &["пари", "заняття", "графік", "час занять"]),
    ("дослідження", &["наука", "наукова робота", "публікації", "конференції"]),
    ("конференція", &["симпозіум", "форум", "наукова подія", "семінар"]),
    ("вступ", &["абітурієнт", "прийом", "документи", "конкурс", "зарахування"]),
    ("контакти", &["телефон", "адреса", "email", "зв'язок", "розташування"]),
];

const GREETINGS: &[&str] = &["привіт", "привет", "дякую", "спасибо", "пока", "бувай", "hi", "hello", "bye"];
const QUESTION_WORDS: &[&str] = &["що", "як", "коли", "де", "хто", "чому", "який", "яка", "яке", "чи"];

const GENERAL_REASONING: &str = "Загальний запит про НАУ";
const NO_GROUP: &str = "Не вказано";
const NO_HISTORY: &str = "Початок діалогу";

const SYSTEM_PROMPT: &str = r#"You are the query router of the National Aviation University (NAU) assistant.

University structure (faculty, then its departments):
{hierarchy}
Classify the new question using the dialogue history. A question that does not
name its subject refers to whatever the previous messages discussed.

Reply with ONE JSON object and nothing else. Fields, in this order:
  "reasoning": your analysis of the history and the question (always first),
  "search_scope": a faculty code from the structure above, or "global",
  "search_level": "faculty" | "department" | "general",
  "target_entity": a department code, or null,
  "search_intent": "info" | "schedule" | "news" | "contacts" | "events",
  "enhancement_keywords": nouns likely to appear in news texts (names, places,
      events, topics and their synonyms); never question words or verbs,
  "confidence": number between 0 and 1,
  "needs_search": false only for greetings, thanks, or requests to rephrase an
      answer already given; true otherwise"#;

/// Raw model reply. Every field except `target_entity` and
/// `enhancement_keywords` is required.
#[derive(Debug, Deserialize)]
struct ModelRoute {
    reasoning: String,
    search_scope: String,
    search_level: String,
    #[serde(default)]
    target_entity: Option<String>,
    search_intent: String,
    #[serde(default)]
    enhancement_keywords: Vec<String>,
    confidence: f32,
    #[serde(alias = "needs_database_search")]
    needs_search: bool,
}

impl StructuredReply for ModelRoute {
    fn check(&self) -> Result<(), String> {
        if !self.confidence.is_finite() {
            return Err("confidence is not a number".to_string());
        }
        Ok(())
    }
}

/// Classifies questions into scope, target, intent and search terms.
pub struct QueryRouter {
    reasoner: Arc<dyn ReasoningService>,
    entities: Arc<EntityIndex>,
    policy: RetryPolicy,
}

impl QueryRouter {
    pub fn new(
        reasoner: Arc<dyn ReasoningService>,
        entities: Arc<EntityIndex>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            reasoner,
            entities,
            policy,
        }
    }

    /// Route one question.
    pub async fn route(
        &self,
        question: &str,
        history: &[TurnMessage],
        group: Option<&str>,
    ) -> RouteDecision {
        self.route_with_origin(question, history, group).await.0
    }

    /// Route one question and report which path decided.
    pub async fn route_with_origin(
        &self,
        question: &str,
        history: &[TurnMessage],
        group: Option<&str>,
    ) -> (RouteDecision, RouteOrigin) {
        let messages = vec![TurnMessage::user(self.user_message(question, history, group))];
        let prompt = self.system_prompt();

        match complete_structured::<ModelRoute>(self.reasoner.as_ref(), &prompt, &messages, self.policy)
            .await
        {
            StructuredOutcome::Parsed { value, attempts } => {
                let decision = self.normalize(value);
                debug!(
                    "Model route after {} attempt(s): scope={}, entity={:?}, intent={}",
                    attempts, decision.search_scope, decision.target_entity, decision.search_intent
                );
                (decision, RouteOrigin::Model)
            }
            StructuredOutcome::Unparseable { attempts, last_error } => {
                warn!(
                    "Model routing gave up after {} attempt(s) ({}); using heuristic",
                    attempts, last_error
                );
                let decision = self.heuristic_route(question, history, group);
                info!("Heuristic route: scope={}", decision.search_scope);
                (decision, RouteOrigin::Heuristic)
            }
        }
    }

    fn system_prompt(&self) -> String {
        SYSTEM_PROMPT.replace("{hierarchy}", &self.entities.hierarchy().summary())
    }

    fn user_message(&self, question: &str, history: &[TurnMessage], group: Option<&str>) -> String {
        let mut turns = history;
        if let Some(last) = turns.last() {
            if last.role == Role::User && last.content.trim() == question.trim() {
                turns = &turns[..turns.len() - 1];
            }
        }
        let window = &turns[turns.len().saturating_sub(HISTORY_WINDOW)..];

        let history_text = if window.is_empty() {
            NO_HISTORY.to_string()
        } else {
            window
                .iter()
                .map(|m| {
                    let speaker = match m.role {
                        Role::User => "Користувач",
                        Role::Assistant => "Асистент",
                        Role::System => "Система",
                    };
                    format!("{}: {}", speaker, m.content)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "КОНТЕКСТ ДІАЛОГУ:\n{}\n\nГРУПА СТУДЕНТА: {}\n\nНОВИЙ ЗАПИТ: \"{}\"",
            history_text,
            group.filter(|g| !g.trim().is_empty()).unwrap_or(NO_GROUP),
            question
        )
    }

    /// Map a raw model reply onto the hierarchy.
    fn normalize(&self, raw: ModelRoute) -> RouteDecision {
        let hierarchy = self.entities.hierarchy();

        let scope_text = raw.search_scope.trim();
        let mut scope = if scope_text.is_empty() || scope_text.eq_ignore_ascii_case(SearchScope::GLOBAL) {
            SearchScope::Global
        } else if let Some(faculty) = hierarchy.faculty(scope_text) {
            SearchScope::Faculty(faculty.id.clone())
        } else if let Some((faculty, _)) = hierarchy.department(scope_text) {
            SearchScope::Faculty(faculty.id.clone())
        } else {
            debug!("Unknown scope {:?} from model, using global", scope_text);
            SearchScope::Global
        };

        let target_entity = raw
            .target_entity
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("null"))
            .and_then(|t| hierarchy.department(t))
            .map(|(faculty, dept)| {
                // The department's own faculty wins over an inconsistent scope.
                scope = SearchScope::Faculty(faculty.id.clone());
                dept.id.clone()
            });

        let mut search_level = SearchLevel::parse_lenient(&raw.search_level);
        if search_level == SearchLevel::Department && target_entity.is_none() {
            search_level = if scope.is_global() {
                SearchLevel::General
            } else {
                SearchLevel::Faculty
            };
        }

        let reasoning = if raw.reasoning.trim().is_empty() {
            GENERAL_REASONING.to_string()
        } else {
            raw.reasoning
        };

        RouteDecision {
            search_scope: scope,
            search_level,
            target_entity,
            search_intent: SearchIntent::parse_lenient(&raw.search_intent),
            enhancement_keywords: dedupe(raw.enhancement_keywords.into_iter(), usize::MAX),
            confidence: raw.confidence.clamp(0.0, 1.0),
            reasoning,
            needs_search: raw.needs_search,
        }
    }

    /// Deterministic routing from entity mentions, history and group code.
    ///
    /// Priority: direct mention, then history context, then group, then global.
    pub fn heuristic_route(
        &self,
        question: &str,
        history: &[TurnMessage],
        group: Option<&str>,
    ) -> RouteDecision {
        let hierarchy = self.entities.hierarchy();
        let lower = question.to_lowercase();

        let mut scope = SearchScope::Global;
        let mut level = SearchLevel::General;
        let mut target = None;
        let mut confidence = BASELINE_CONFIDENCE;
        let mut reasoning = GENERAL_REASONING.to_string();

        if let Some(direct) = self.entities.extract(question).into_iter().next() {
            scope = SearchScope::Faculty(direct.faculty_code.clone());
            reasoning = format!("Знайдено: {} → {}", direct.matched, direct.full_name);
            match direct.kind {
                EntityKind::Faculty => {
                    level = SearchLevel::Faculty;
                    confidence = DIRECT_FACULTY_CONFIDENCE;
                }
                EntityKind::Department => {
                    level = SearchLevel::Department;
                    target = Some(direct.code);
                    confidence = DIRECT_DEPARTMENT_CONFIDENCE;
                }
            }
        } else if let Some(context) = self.history_entity(history) {
            scope = SearchScope::Faculty(context.faculty_code.clone());
            match context.kind {
                EntityKind::Faculty => {
                    level = SearchLevel::Faculty;
                    confidence = HISTORY_FACULTY_CONFIDENCE;
                    reasoning = format!("Контекст з історії: факультет {}", context.code);
                }
                EntityKind::Department => {
                    level = SearchLevel::Department;
                    confidence = HISTORY_DEPARTMENT_CONFIDENCE;
                    reasoning = format!("Контекст з історії: {}", context.code);
                    target = Some(context.code);
                }
            }
        } else if let Some(group) = group.filter(|g| hierarchy.is_technical_group(g)) {
            scope = SearchScope::Faculty(hierarchy.technical_faculty.clone());
            level = SearchLevel::Faculty;
            confidence = GROUP_CONFIDENCE;
            reasoning = format!("Визначено факультет: {} (група {})", hierarchy.technical_faculty, group);
        }

        let intent = detect_intent(&lower);

        RouteDecision {
            search_scope: scope,
            search_level: level,
            target_entity: target,
            search_intent: intent,
            enhancement_keywords: enhancement_keywords(&lower, intent),
            confidence,
            reasoning,
            needs_search: needs_search(&lower),
        }
    }

    /// Last entity mentioned in the recent history.
    fn history_entity(&self, history: &[TurnMessage]) -> Option<kai_core::EntityMatch> {
        let window = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
        if window.is_empty() {
            return None;
        }
        let text = window
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.entities.extract(&text).pop()
    }
}

/// Intent from fixed keyword sets over the lowercased question.
pub fn detect_intent(lower: &str) -> SearchIntent {
    INTENT_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(intent, _)| *intent)
        .unwrap_or(SearchIntent::Info)
}

/// Synonym expansions plus intent boilerplate, deduplicated and capped.
pub fn enhancement_keywords(lower: &str, intent: SearchIntent) -> Vec<String> {
    let synonyms = SYNONYMS
        .iter()
        .filter(|(key, _)| lower.contains(key))
        .flat_map(|(_, terms)| terms.iter().take(SYNONYM_TERMS));
    let boilerplate = intent_terms(intent).iter().take(INTENT_TERMS);
    dedupe(synonyms.chain(boilerplate).map(|s| s.to_string()), MAX_ENHANCEMENT_KEYWORDS)
}

/// False only for short, pure greetings without an interrogative word.
pub fn needs_search(lower: &str) -> bool {
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();
    let greeting = words.iter().any(|w| GREETINGS.contains(w));
    let question = words.iter().any(|w| QUESTION_WORDS.contains(w));
    !(words.len() <= GREETING_MAX_WORDS && greeting) || question
}

/// Trim, drop empties and case-insensitive duplicates, keep order.
fn dedupe(items: impl Iterator<Item = String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .take(cap)
        .collect()
}
