//! Service facade over the retrieval pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kai_core::tuning::vector::PASSAGE_CHARS;
use kai_core::{
    Document, DocumentStore, EncodeTask, EntityIndex, KaiConfig, KaiError, MetadataValue,
    ReasoningService, Result, TurnMessage, VectorEncoder,
};
use kai_embed::{MockEncoder, OnnxEncoder};
use kai_reason::HttpReasoner;
use kai_retrieval::Retriever;
use kai_store::SqliteStore;
use kai_timetable::{
    extract_group_code, normalize_group, period, period_at, JsonDirSource, Lesson,
    TimetableCache, TimetableSource,
};

/// Long-lived service state. One instance serves any number of exchanges.
pub struct KaiServer {
    config: KaiConfig,

    store: Arc<SqliteStore>,

    encoder: Arc<dyn VectorEncoder>,

    reasoner: Arc<dyn ReasoningService>,

    retriever: Retriever,

    /// Read-only from the exchange path; filled by `timetable` refreshes.
    timetables: TimetableCache,

    timetable_source: Arc<dyn TimetableSource>,
}

/// Ask / route request parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AskParams {
    pub question: String,

    /// Earlier turns, oldest first.
    #[serde(default)]
    pub history: Vec<TurnMessage>,

    /// Student group code, if known.
    #[serde(default)]
    pub group: Option<String>,
}

impl AskParams {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
            group: None,
        }
    }
}

/// One record of an import batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportDocument {
    /// Derived from the content and metadata when absent.
    #[serde(default)]
    pub id: Option<String>,

    pub content: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// Timetable request parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TimetableParams {
    /// Group code; when absent one is looked for in `text`.
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub text: Option<String>,

    /// Defaults to today.
    #[serde(default)]
    pub date: Option<NaiveDate>,

    /// Time of day for the current and next lesson. Defaults to now when
    /// `date` is absent.
    #[serde(default)]
    pub time: Option<NaiveTime>,

    /// Bypass the cache.
    #[serde(default)]
    pub refresh: bool,
}

/// Tool result.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    /// Whether the operation was successful.
    pub success: bool,

    /// Result message or content.
    pub message: String,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self::success(text),
            Err(e) => Self::error(format!("Failed to serialize result: {}", e)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct LessonView {
    time: Option<String>,
    #[serde(flatten)]
    lesson: Lesson,
}

impl LessonView {
    fn new(lesson: &Lesson) -> Self {
        Self {
            time: period(lesson.number).map(|p| p.label()),
            lesson: lesson.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DayView {
    group: String,
    date: NaiveDate,
    week: u8,
    lessons: Vec<LessonView>,
    /// Lesson in progress at the requested time.
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<LessonView>,
    /// First lesson starting after the requested time.
    #[serde(skip_serializing_if = "Option::is_none")]
    next: Option<LessonView>,
}

#[derive(Debug, Serialize)]
struct StatsView {
    #[serde(flatten)]
    store: kai_core::StoreStats,
    encoder_dimension: usize,
    cached_timetables: u64,
    reasoning_service: String,
    reasoning_available: bool,
}

impl KaiServer {
    /// Open the configured database and wire the real collaborators.
    pub fn new(config: KaiConfig) -> Result<Self> {
        info!("Initializing kai with database at {:?}", config.store.path);
        let store = Arc::new(SqliteStore::open(&config.store)?);
        let encoder = Self::load_encoder(&config)?;
        let reasoner: Arc<dyn ReasoningService> =
            Arc::new(HttpReasoner::new(config.reasoning.clone())?);
        Self::with_parts(config, store, encoder, reasoner)
    }

    /// Same as [`KaiServer::new`] over an in-memory database.
    pub fn new_memory(config: KaiConfig) -> Result<Self> {
        info!("Initializing kai with in-memory database");
        let store = Arc::new(SqliteStore::open_memory()?);
        let encoder = Self::load_encoder(&config)?;
        let reasoner: Arc<dyn ReasoningService> =
            Arc::new(HttpReasoner::new(config.reasoning.clone())?);
        Self::with_parts(config, store, encoder, reasoner)
    }

    /// Wire explicit collaborators.
    pub fn with_parts(
        config: KaiConfig,
        store: Arc<SqliteStore>,
        encoder: Arc<dyn VectorEncoder>,
        reasoner: Arc<dyn ReasoningService>,
    ) -> Result<Self> {
        config.validate()?;
        let entities = Arc::new(EntityIndex::new(config.hierarchy.clone())?);
        let retriever = Retriever::build(
            reasoner.clone(),
            encoder.clone(),
            store.clone() as Arc<dyn DocumentStore>,
            entities,
            &config,
        );
        let timetables = TimetableCache::new(&config.timetable);
        let timetable_source: Arc<dyn TimetableSource> =
            Arc::new(JsonDirSource::new(config.timetable.data_dir.clone()));

        Ok(Self {
            config,
            store,
            encoder,
            reasoner,
            retriever,
            timetables,
            timetable_source,
        })
    }

    /// Replace the timetable source.
    pub fn with_timetable_source(mut self, source: Arc<dyn TimetableSource>) -> Self {
        self.timetable_source = source;
        self
    }

    fn load_encoder(config: &KaiConfig) -> Result<Arc<dyn VectorEncoder>> {
        if OnnxEncoder::model_present(&config.embedding) {
            Ok(Arc::new(OnnxEncoder::from_config(&config.embedding)?))
        } else {
            warn!(
                "No ONNX model at {:?}, falling back to the hashing encoder",
                config.embedding.model_path
            );
            Ok(Arc::new(MockEncoder::with_dimension(config.embedding.dimension)))
        }
    }

    pub fn config(&self) -> &KaiConfig {
        &self.config
    }

    /// Get the server info.
    pub fn info() -> ServerInfo {
        ServerInfo {
            name: "kai".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Retrieval pipeline for the NAU university assistant".to_string(),
        }
    }

    /// List available tools.
    pub fn tools() -> Vec<ToolInfo> {
        vec![
            ToolInfo {
                name: "kai_ask".to_string(),
                description: "Route, search and validate evidence for a question".to_string(),
            },
            ToolInfo {
                name: "kai_route".to_string(),
                description: "Show the routing decision for a question".to_string(),
            },
            ToolInfo {
                name: "kai_import".to_string(),
                description: "Encode and store a batch of documents".to_string(),
            },
            ToolInfo {
                name: "kai_stats".to_string(),
                description: "Get statistics about the knowledge store".to_string(),
            },
            ToolInfo {
                name: "kai_timetable".to_string(),
                description: "Lessons of a student group on a date".to_string(),
            },
        ]
    }

    /// Run one retrieval exchange.
    pub async fn ask(&self, params: AskParams) -> ToolResult {
        if params.question.trim().is_empty() {
            return ToolResult::error("Question is empty");
        }
        let exchange = self
            .retriever
            .ask(&params.question, &params.history, params.group.as_deref())
            .await;
        ToolResult::json(&exchange)
    }

    /// Routing decision alone, without searching.
    pub async fn route(&self, params: AskParams) -> ToolResult {
        if params.question.trim().is_empty() {
            return ToolResult::error("Question is empty");
        }
        let (route, origin) = self
            .retriever
            .router()
            .route_with_origin(&params.question, &params.history, params.group.as_deref())
            .await;
        ToolResult::json(&serde_json::json!({ "route": route, "origin": origin }))
    }

    /// Import a JSON array of documents.
    pub async fn import_json(&self, json: &str) -> ToolResult {
        match serde_json::from_str::<Vec<ImportDocument>>(json) {
            Ok(batch) => self.import(batch).await,
            Err(e) => ToolResult::error(format!("Invalid import batch: {}", e)),
        }
    }

    /// Encode passages and upsert them.
    pub async fn import(&self, batch: Vec<ImportDocument>) -> ToolResult {
        match self.import_inner(batch).await {
            Ok(count) => ToolResult::json(&serde_json::json!({ "imported": count })),
            Err(e) => ToolResult::error(format!("Import failed: {}", e)),
        }
    }

    async fn import_inner(&self, batch: Vec<ImportDocument>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        info!("Importing {} documents", batch.len());

        let documents = batch
            .into_iter()
            .map(|item| {
                if item.content.trim().is_empty() {
                    return Err(KaiError::invalid_argument("document content is empty"));
                }
                let id = match item.id.filter(|id| !id.trim().is_empty()) {
                    Some(id) => id,
                    None => derive_id(&item.content, &item.metadata)?,
                };
                Ok(Document {
                    id,
                    content: item.content,
                    metadata: item.metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let passages: Vec<String> = documents
            .iter()
            .map(|d| EncodeTask::Passage.apply(&truncate_chars(&d.content, PASSAGE_CHARS)))
            .collect();
        let refs: Vec<&str> = passages.iter().map(String::as_str).collect();
        let embeddings = self.encoder.encode(&refs, EncodeTask::Passage).await?;

        self.store.upsert(&documents, &embeddings).await
    }

    /// Knowledge store statistics and reasoning-service reachability.
    pub async fn stats(&self) -> ToolResult {
        let store = match self.store.stats().await {
            Ok(store) => store,
            Err(e) => return ToolResult::error(format!("Failed to get stats: {}", e)),
        };
        let reasoning_available = match self.reasoner.health().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Reasoning service {} is unreachable: {}", self.reasoner.name(), e);
                false
            }
        };
        ToolResult::json(&StatsView {
            store,
            encoder_dimension: self.encoder.dimension(),
            cached_timetables: self.timetables.len(),
            reasoning_service: self.reasoner.name().to_string(),
            reasoning_available,
        })
    }

    /// Lessons of one group on one date.
    pub async fn timetable(&self, params: TimetableParams) -> ToolResult {
        let group = params
            .group
            .as_deref()
            .map(normalize_group)
            .or_else(|| params.text.as_deref().and_then(extract_group_code));
        let Some(group) = group else {
            return ToolResult::error("No group code given or found in the text");
        };

        let source = self.timetable_source.as_ref();
        let fetched = if params.refresh {
            self.timetables.refresh(&group, source).await
        } else {
            self.timetables.get_or_refresh(&group, source).await
        };
        let timetable = match fetched {
            Ok(t) => t,
            Err(KaiError::DocumentNotFound { .. }) => {
                return ToolResult::error(format!("No timetable for group {}", group));
            }
            Err(e) => return ToolResult::error(format!("Timetable unavailable: {}", e)),
        };

        let now = Local::now().naive_local();
        let date = params.date.unwrap_or(now.date());
        let time = params.time.or(params.date.is_none().then(|| now.time()));
        let semester_start = self.config.timetable.semester_start;
        let lessons: Vec<LessonView> = timetable
            .on_date(semester_start, date)
            .into_iter()
            .map(LessonView::new)
            .collect();

        let (current, next) = match time {
            Some(time) => current_and_next(&lessons, time),
            None => (None, None),
        };

        ToolResult::json(&DayView {
            group,
            date,
            week: kai_timetable::teaching_week(semester_start, date),
            lessons,
            current,
            next,
        })
    }
}

/// Lesson whose period covers `time`, and the first lesson of a later period.
fn current_and_next(lessons: &[LessonView], time: NaiveTime) -> (Option<LessonView>, Option<LessonView>) {
    let (current_period, next_period) = period_at(time);
    let current = current_period
        .and_then(|p| lessons.iter().find(|l| l.lesson.number == p.number))
        .cloned();
    let next = next_period
        .and_then(|p| {
            lessons
                .iter()
                .filter(|l| l.lesson.number >= p.number)
                .min_by_key(|l| l.lesson.number)
        })
        .cloned();
    (current, next)
}

/// Content-addressed id: blake3 over content and canonical metadata JSON.
fn derive_id(content: &str, metadata: &BTreeMap<String, MetadataValue>) -> Result<String> {
    let meta = serde_json::to_string(metadata)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(content.as_bytes());
    hasher.update(&[0]);
    hasher.update(meta.as_bytes());
    Ok(hex::encode(&hasher.finalize().as_bytes()[..16]))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Server info.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Tool info.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}
