//! Configuration types for the kai pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{KaiError, Result};
use crate::hierarchy::OrgHierarchy;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KaiConfig {
    /// Document store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Vector encoder configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reasoning service configuration.
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Retrieval loop budgets.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Timetable cache configuration.
    #[serde(default)]
    pub timetable: TimetableConfig,

    /// Organizational table. Defaults to the built-in one.
    #[serde(default)]
    pub hierarchy: OrgHierarchy,
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: true,
            cache_size: default_cache_size(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Vector encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Output dimension of the model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Batch size for encoding.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Maximum sequence length in tokens.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Name of the model's task-id input, for models that take one.
    #[serde(default)]
    pub task_input: Option<String>,

    /// Task id fed for query encoding.
    #[serde(default)]
    pub query_task_id: i64,

    /// Task id fed for passage encoding.
    #[serde(default = "default_passage_task_id")]
    pub passage_task_id: i64,

    /// Passages are cut to this many characters before encoding.
    #[serde(default = "default_max_passage_chars")]
    pub max_passage_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            num_threads: default_num_threads(),
            max_length: default_max_length(),
            task_input: None,
            query_task_id: 0,
            passage_task_id: default_passage_task_id(),
            max_passage_chars: default_max_passage_chars(),
        }
    }
}

/// Reasoning service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token, if the endpoint needs one.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,

    /// Attempts per structured completion before falling back.
    #[serde(default = "default_structured_retries")]
    pub max_retries: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_call_timeout(),
            max_retries: default_structured_retries(),
        }
    }
}

impl ReasoningConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retrieval loop budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Validation passes per question.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Hits kept after fusion and shown to the validator.
    #[serde(default = "default_fused_top_k")]
    pub fused_top_k: usize,

    /// Candidates requested from the vector store.
    #[serde(default = "default_fetch")]
    pub vector_fetch: usize,

    /// Lexical candidates kept before fusion.
    #[serde(default = "default_fetch")]
    pub lexical_fetch: usize,

    /// Value of the `source` metadata every search is restricted to.
    #[serde(default = "default_corpus_source")]
    pub corpus_source: String,

    /// Per-call timeout for encoder and store calls, in seconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    /// Deadline for one whole exchange, in seconds. Derived from the
    /// per-call budgets when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_timeout_secs: Option<u64>,

    /// Reject reformulations that share no keyword with the question.
    #[serde(default)]
    pub drift_guard: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            fused_top_k: default_fused_top_k(),
            vector_fetch: default_fetch(),
            lexical_fetch: default_fetch(),
            corpus_source: default_corpus_source(),
            search_timeout_secs: default_search_timeout(),
            exchange_timeout_secs: None,
            drift_guard: false,
        }
    }
}

impl RetrievalConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

/// Timetable cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimetableConfig {
    /// Directory of `<GROUP>.json` timetables.
    #[serde(default = "default_timetable_dir")]
    pub data_dir: PathBuf,

    /// Seconds an entry stays cached.
    #[serde(default = "default_timetable_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_timetable_capacity")]
    pub capacity: u64,

    /// Fetch attempts per refresh.
    #[serde(default = "default_refresh_attempts")]
    pub refresh_attempts: u32,

    /// First retry delay; doubles per attempt.
    #[serde(default = "default_refresh_base_delay")]
    pub refresh_base_delay_secs: u64,

    /// First day of the semester, for week parity.
    #[serde(default = "default_semester_start")]
    pub semester_start: NaiveDate,
}

impl Default for TimetableConfig {
    fn default() -> Self {
        Self {
            data_dir: default_timetable_dir(),
            ttl_secs: default_timetable_ttl(),
            capacity: default_timetable_capacity(),
            refresh_attempts: default_refresh_attempts(),
            refresh_base_delay_secs: default_refresh_base_delay(),
            semester_start: default_semester_start(),
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_dimension() -> usize {
    768
}

fn default_batch_size() -> usize {
    32
}

fn default_num_threads() -> usize {
    4
}

fn default_max_length() -> usize {
    512
}

fn default_passage_task_id() -> i64 {
    1
}

fn default_max_passage_chars() -> usize {
    4000
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "gemma2:9b".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_call_timeout() -> u64 {
    30
}

fn default_structured_retries() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_fused_top_k() -> usize {
    15
}

fn default_fetch() -> usize {
    75
}

fn default_corpus_source() -> String {
    "news".to_string()
}

fn default_search_timeout() -> u64 {
    20
}

fn default_timetable_ttl() -> u64 {
    6 * 3600
}

fn default_timetable_capacity() -> u64 {
    1024
}

fn default_refresh_attempts() -> u32 {
    10
}

fn default_refresh_base_delay() -> u64 {
    10
}

fn default_semester_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default()
}

fn data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kai")
}

fn default_database_path() -> PathBuf {
    data_root().join("kai.db")
}

fn default_model_path() -> PathBuf {
    data_root().join("models").join("multilingual-e5-base")
}

fn default_timetable_dir() -> PathBuf {
    data_root().join("timetables")
}

impl KaiConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| KaiError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("kai").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("kai.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Reject budgets the retrieval loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.max_attempts == 0 {
            return Err(KaiError::config("retrieval.max_attempts must be at least 1"));
        }
        if self.retrieval.fused_top_k == 0 {
            return Err(KaiError::config("retrieval.fused_top_k must be at least 1"));
        }
        if self.reasoning.max_retries == 0 {
            return Err(KaiError::config("reasoning.max_retries must be at least 1"));
        }
        if self.reasoning.timeout_secs == 0
            || self.retrieval.search_timeout_secs == 0
            || self.retrieval.exchange_timeout_secs == Some(0)
        {
            return Err(KaiError::config("timeouts must be positive"));
        }
        if let Some(secs) = self.retrieval.exchange_timeout_secs {
            let budget = self.exchange_budget();
            if Duration::from_secs(secs) < budget {
                return Err(KaiError::config(format!(
                    "retrieval.exchange_timeout_secs ({}) is below the per-call budget ({}s)",
                    secs,
                    budget.as_secs()
                )));
            }
        }
        self.hierarchy.validate()
    }

    /// Worst-case time of one exchange when every call runs to its timeout:
    /// routing, then per attempt one validation and two searches for each
    /// of the encoder and the store.
    pub fn exchange_budget(&self) -> Duration {
        let completion = self.reasoning.call_timeout() * self.reasoning.max_retries;
        let searches = self.retrieval.search_timeout() * 4;
        completion + (completion + searches) * self.retrieval.max_attempts
    }

    /// The configured exchange deadline, or the per-call budget plus one
    /// call timeout of headroom.
    pub fn exchange_timeout(&self) -> Duration {
        match self.retrieval.exchange_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.exchange_budget() + self.reasoning.call_timeout(),
        }
    }

    /// Serialize to TOML, for `kai init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| KaiError::config(format!("Failed to serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KaiConfig::default();
        assert_eq!(config.retrieval.max_attempts, 3);
        assert_eq!(config.retrieval.fused_top_k, 15);
        assert_eq!(config.retrieval.vector_fetch, 75);
        assert_eq!(config.retrieval.corpus_source, "news");
        assert!(!config.retrieval.drift_guard);
        assert_eq!(config.reasoning.max_retries, 3);
        assert!((config.reasoning.temperature - 0.3).abs() < f32::EPSILON);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: KaiConfig = toml::from_str(
            r#"
            [retrieval]
            drift_guard = true

            [timetable]
            semester_start = "2026-02-02"
            "#,
        )
        .unwrap();
        assert!(config.retrieval.drift_guard);
        assert_eq!(config.retrieval.max_attempts, 3);
        assert_eq!(
            config.timetable.semester_start,
            NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()
        );
        assert_eq!(config.hierarchy.faculties.len(), 2);
    }

    #[test]
    fn test_load_rejects_zero_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kai.toml");
        std::fs::write(&path, "[retrieval]\nmax_attempts = 0\n").unwrap();
        let err = KaiConfig::load(&path).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let text = KaiConfig::default().to_toml().unwrap();
        let back: KaiConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.retrieval.fused_top_k, 15);
        assert_eq!(back.hierarchy, OrgHierarchy::default());
        assert!(back.retrieval.exchange_timeout_secs.is_none());
    }

    #[test]
    fn test_default_deadline_covers_call_budgets() {
        let config = KaiConfig::default();
        // 3x30s routing, then 3 attempts of 3x30s validation and 4x20s search.
        assert_eq!(config.exchange_budget(), Duration::from_secs(600));
        assert!(config.exchange_timeout() > config.exchange_budget());
    }

    #[test]
    fn test_deadline_follows_scaled_call_timeouts() {
        let mut config = KaiConfig::default();
        config.reasoning.timeout_secs = 1;
        config.retrieval.search_timeout_secs = 1;
        assert_eq!(config.exchange_budget(), Duration::from_secs(24));
        assert_eq!(config.exchange_timeout(), Duration::from_secs(25));
    }

    #[test]
    fn test_rejects_deadline_below_call_budget() {
        let mut config = KaiConfig::default();
        config.retrieval.exchange_timeout_secs = Some(180);
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");

        config.retrieval.exchange_timeout_secs = Some(600);
        config.validate().unwrap();
        assert_eq!(config.exchange_timeout(), Duration::from_secs(600));

        config.retrieval.exchange_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }
}
