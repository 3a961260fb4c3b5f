//! Core domain types for the retrieval pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known metadata keys.
pub mod meta {
    pub const SOURCE: &str = "source";
    pub const FACULTY: &str = "faculty";
    pub const DEPARTMENT: &str = "department";
    pub const CATEGORY: &str = "category";
    pub const NEWS_TYPE: &str = "news_type";
    pub const DATE: &str = "date";
    pub const TITLE: &str = "title";
    pub const URL: &str = "url";
    pub const GROUP: &str = "group";
    pub const DAY: &str = "day";
    pub const WEEK: &str = "week";
}

/// A metadata value: a calendar date or free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Date(NaiveDate),
    Text(String),
}

impl MetadataValue {
    /// Textual form used for filtering and scoring.
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<NaiveDate> for MetadataValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

/// A record in the knowledge store. The pipeline only reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique within the store.
    pub id: String,

    /// Body text.
    pub content: String,

    /// Routing and filtering metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Document {
    /// Create a document without metadata.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style metadata setter.
    pub fn with_meta(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Metadata value as text, if present.
    pub fn meta_text(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(MetadataValue::as_text)
    }

    /// The title field, if present and non-empty.
    pub fn title(&self) -> Option<String> {
        self.meta_text(meta::TITLE).filter(|t| !t.trim().is_empty())
    }
}

/// Which retrieval signal produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitOrigin {
    Lexical,
    Vector,
    Hybrid,
}

impl fmt::Display for HitOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// A search result. Created per search call, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: Document,

    /// Store distance (cosine). Lexical hits carry a synthetic distance.
    pub distance: f32,

    /// Higher is better; lists are sorted descending by this.
    pub relevance_score: f32,

    pub origin: HitOrigin,
}

/// Organizational scope of a search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SearchScope {
    Global,
    Faculty(String),
}

impl SearchScope {
    pub const GLOBAL: &'static str = "global";

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Faculty id for faculty scopes.
    pub fn faculty(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Faculty(id) => Some(id),
        }
    }
}

impl From<String> for SearchScope {
    fn from(s: String) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(Self::GLOBAL) {
            Self::Global
        } else {
            Self::Faculty(trimmed.to_string())
        }
    }
}

impl From<SearchScope> for String {
    fn from(scope: SearchScope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str(Self::GLOBAL),
            Self::Faculty(id) => f.write_str(id),
        }
    }
}

/// Granularity of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchLevel {
    Faculty,
    Department,
    General,
}

impl SearchLevel {
    /// Lenient parse; unknown values become `General`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "faculty" => Self::Faculty,
            "department" => Self::Department,
            _ => Self::General,
        }
    }
}

/// What kind of information the question is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchIntent {
    Info,
    Schedule,
    News,
    Contacts,
    Events,
}

impl SearchIntent {
    /// Lenient parse; unknown values become `Info`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "schedule" => Self::Schedule,
            "news" => Self::News,
            "contacts" => Self::Contacts,
            "events" => Self::Events,
            _ => Self::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Schedule => "schedule",
            Self::News => "news",
            Self::Contacts => "contacts",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for SearchIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one question. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub search_scope: SearchScope,
    pub search_level: SearchLevel,
    /// Department id when the question targets one department.
    pub target_entity: Option<String>,
    pub search_intent: SearchIntent,
    pub enhancement_keywords: Vec<String>,
    /// In [0, 1].
    pub confidence: f32,
    pub reasoning: String,
    pub needs_search: bool,
}

/// How the validator proposes to rewrite a failed query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReformulationStrategy {
    /// Add role synonyms for a person.
    EnrichPerson,
    EnrichEvent,
    /// Add contact-specific terms.
    EnrichContacts,
    GeneralizeTopic,
    /// Broaden the organizational scope.
    ExpandScope,
    AddSynonyms,
    Other(String),
}

impl ReformulationStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EnrichPerson => "enrich_person",
            Self::EnrichEvent => "enrich_event",
            Self::EnrichContacts => "enrich_contacts",
            Self::GeneralizeTopic => "generalize_topic",
            Self::ExpandScope => "expand_scope",
            Self::AddSynonyms => "add_synonyms",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ReformulationStrategy {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "enrich_person" => Self::EnrichPerson,
            "enrich_event" => Self::EnrichEvent,
            "enrich_contacts" => Self::EnrichContacts,
            "generalize_topic" => Self::GeneralizeTopic,
            "expand_scope" => Self::ExpandScope,
            "add_synonyms" => Self::AddSynonyms,
            _ => Self::Other(s),
        }
    }
}

impl From<ReformulationStrategy> for String {
    fn from(strategy: ReformulationStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl fmt::Display for ReformulationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict on one fused result list. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDecision {
    pub is_relevant: bool,
    /// 1-based indices into the fused list.
    pub selected_indices: Vec<usize>,
    pub confidence: f32,
    pub reasoning: String,
    pub needs_reformulation: bool,
    pub reformulated_query: Option<String>,
    pub reformulation_strategy: Option<ReformulationStrategy>,
}

/// One search+validate cycle, kept in the exchange trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalAttempt {
    /// 1-based.
    pub attempt_number: u32,
    /// Query text that produced `raw_hits` (after any simplification).
    pub query_text: String,
    /// Whether the query was cut to its first token after a zero-hit search.
    pub simplified: bool,
    /// Vector plus lexical hits before fusion.
    pub raw_count: usize,
    /// Fused hits shown to the validator.
    pub raw_hits: Vec<SearchHit>,
    /// Absent when the attempt ended before validation.
    pub validation: Option<ValidationDecision>,
}

/// Speaker of a dialogue turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message of dialogue history, also used for reasoning-service requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: Role,
    pub content: String,
}

impl TurnMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conjunction of metadata equality predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    conditions: Vec<(String, String)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key == value`. A repeated key replaces the earlier value.
    pub fn equals(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.conditions.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value,
            None => self.conditions.push((key.to_string(), value)),
        }
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.conditions
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether every predicate holds for `doc`. Missing keys never match.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(k, v)| doc.meta_text(k).as_deref() == Some(v.as_str()))
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return f.write_str("(none)");
        }
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(" AND "))
    }
}

/// Statistics about the knowledge store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub documents: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_source: BTreeMap<String, u64>,
    /// Distinct values of the `group` metadata key.
    pub groups: u64,
    pub avg_content_chars: f64,
    /// Database size in bytes, when known.
    pub storage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_value_untagged() {
        let v: MetadataValue = serde_json::from_str("\"2025-10-01\"").unwrap();
        assert_eq!(v, MetadataValue::Date(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()));
        let v: MetadataValue = serde_json::from_str("\"ФКНТ\"").unwrap();
        assert_eq!(v, MetadataValue::Text("ФКНТ".to_string()));
        assert_eq!(
            MetadataValue::Date(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()).as_text(),
            "2025-09-01"
        );
    }

    #[test]
    fn test_search_scope_serde() {
        let scope: SearchScope = serde_json::from_str("\"global\"").unwrap();
        assert_eq!(scope, SearchScope::Global);
        let scope: SearchScope = serde_json::from_str("\"ФКНТ\"").unwrap();
        assert_eq!(scope.faculty(), Some("ФКНТ"));
        assert_eq!(serde_json::to_string(&scope).unwrap(), "\"ФКНТ\"");
    }

    #[test]
    fn test_intent_lenient() {
        assert_eq!(SearchIntent::parse_lenient("Contacts"), SearchIntent::Contacts);
        assert_eq!(SearchIntent::parse_lenient("weather"), SearchIntent::Info);
    }

    #[test]
    fn test_strategy_round_names() {
        let s: ReformulationStrategy = serde_json::from_str("\"expand_scope\"").unwrap();
        assert_eq!(s, ReformulationStrategy::ExpandScope);
        let s: ReformulationStrategy = serde_json::from_str("\"shorten\"").unwrap();
        assert_eq!(s, ReformulationStrategy::Other("shorten".to_string()));
        assert_eq!(s.as_str(), "shorten");
    }

    #[test]
    fn test_filter_matches() {
        let doc = Document::new("1", "body")
            .with_meta(meta::SOURCE, "news")
            .with_meta(meta::FACULTY, "ФКНТ");
        let filter = MetadataFilter::new()
            .equals(meta::SOURCE, "news")
            .equals(meta::FACULTY, "ФКНТ");
        assert!(filter.matches(&doc));
        assert!(!filter.clone().equals(meta::DEPARTMENT, "ІПЗ").matches(&doc));
        assert!(MetadataFilter::new().matches(&doc));
    }

    #[test]
    fn test_filter_repeated_key_replaces() {
        let filter = MetadataFilter::new().equals("a", "1").equals("a", "2");
        assert_eq!(filter.conditions().len(), 1);
        assert_eq!(filter.get("a"), Some("2"));
        assert_eq!(filter.to_string(), "a=2");
    }
}
