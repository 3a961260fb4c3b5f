//! SQLite-based document store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use kai_core::{
    Document, DocumentStore, KaiError, MetadataFilter, MetadataValue, Result, StoreConfig,
    StoreStats,
};

use crate::schema::{SCHEMA, SCHEMA_VERSION};

/// SQLite-based store implementation.
///
/// A single connection behind a blocking Mutex; every trait call takes the
/// lock for the duration of one statement batch.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the configured path.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.path.as_path();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| KaiError::database(format!("Failed to open database: {}", e)))?;

        Self::configure_connection(&conn, config)?;
        Self::init(conn, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| KaiError::database(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn, Path::new(":memory:"))
    }

    fn init(conn: Connection, path: &Path) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| KaiError::database(format!("Failed to initialize schema: {}", e)))?;

        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KaiError::database(e.to_string()))?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(|e| KaiError::database(e.to_string()))?;
            }
            Some(v) if v != SCHEMA_VERSION.to_string() => {
                warn!("Database schema version {} differs from {}", v, SCHEMA_VERSION);
            }
            Some(_) => {}
        }

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection, config: &StoreConfig) -> Result<()> {
        let journal = if config.wal_mode { "WAL" } else { "DELETE" };
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = {};
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            "#,
            journal, config.cache_size, config.busy_timeout_ms
        ))
        .map_err(|e| KaiError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().map_err(|e| KaiError::database(e.to_string()))?;
        f(&conn)
    }

    /// Execute a mutable blocking operation on the connection.
    fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self.conn.lock().map_err(|e| KaiError::database(e.to_string()))?;
        f(&mut conn)
    }

    /// Fetch one document by id.
    pub fn document(&self, id: &str) -> Result<Document> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, content, metadata FROM documents WHERE id = ?1",
                params![id],
                Self::row_to_document,
            )
            .optional()
            .map_err(|e| KaiError::database(e.to_string()))?
            .ok_or_else(|| KaiError::DocumentNotFound { id: id.to_string() })
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(|e| KaiError::database(e.to_string()))
        })
    }

    /// Delete one document. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id])
                .map_err(|e| KaiError::database(e.to_string()))?;
            Ok(n > 0)
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<(Document, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let (clause, values) = Self::filter_clause(filter)?;
        let sql = format!(
            "SELECT id, content, metadata, embedding FROM documents WHERE embedding IS NOT NULL{}",
            clause
        );

        let mut scored = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| KaiError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    let doc = Self::row_to_document(row)?;
                    let blob: Vec<u8> = row.get(3)?;
                    Ok((doc, blob))
                })
                .map_err(|e| KaiError::database(e.to_string()))?;

            let mut scored = Vec::new();
            let mut skipped = 0usize;
            for row in rows {
                let (doc, blob) = row.map_err(|e| KaiError::database(e.to_string()))?;
                let embedding = Self::bytes_to_vec(&blob);
                if embedding.len() != vector.len() {
                    skipped += 1;
                    continue;
                }
                scored.push((doc, cosine_distance(vector, &embedding)));
            }
            if skipped > 0 {
                warn!("Skipped {} documents with mismatched embedding dimension", skipped);
            }
            Ok(scored)
        })?;

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        debug!("Vector query: filter={}, k={}, returned={}", filter, k, scored.len());
        Ok(scored)
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<Document>> {
        let (clause, values) = Self::filter_clause(filter)?;
        let sql = format!(
            "SELECT id, content, metadata FROM documents WHERE 1 = 1{} ORDER BY added_at DESC, id",
            clause
        );

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| KaiError::database(e.to_string()))?;

            let docs = stmt
                .query_map(params_from_iter(values.iter()), Self::row_to_document)
                .map_err(|e| KaiError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| KaiError::database(e.to_string()))?;

            Ok(docs)
        })
    }

    async fn upsert(&self, documents: &[Document], embeddings: &[Vec<f32>]) -> Result<usize> {
        if documents.len() != embeddings.len() {
            return Err(KaiError::invalid_argument(format!(
                "{} documents but {} embeddings",
                documents.len(),
                embeddings.len()
            )));
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| KaiError::database(e.to_string()))?;

            for (doc, embedding) in documents.iter().zip(embeddings) {
                let metadata = serde_json::to_string(&doc.metadata)?;
                tx.execute(
                    r#"
                    INSERT INTO documents (id, content, metadata, embedding, added_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(id) DO UPDATE SET
                        content = excluded.content,
                        metadata = excluded.metadata,
                        embedding = excluded.embedding
                    "#,
                    params![doc.id, doc.content, metadata, Self::vec_to_bytes(embedding), now],
                )
                .map_err(|e| KaiError::database(e.to_string()))?;
            }

            tx.commit().map_err(|e| KaiError::database(e.to_string()))?;

            debug!("Upserted {} documents", documents.len());
            Ok(documents.len())
        })
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let documents: u64 = conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(|e| KaiError::database(e.to_string()))?;

            let by_category = Self::count_by(conn, "category")?;
            let by_source = Self::count_by(conn, "source")?;

            let groups: u64 = conn
                .query_row(
                    "SELECT COUNT(DISTINCT json_extract(metadata, '$.group')) FROM documents",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| KaiError::database(e.to_string()))?;

            let avg_content_chars: f64 = conn
                .query_row(
                    "SELECT COALESCE(AVG(length(content)), 0.0) FROM documents",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| KaiError::database(e.to_string()))?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(StoreStats {
                documents,
                by_category,
                by_source,
                groups,
                avg_content_chars,
                storage_bytes: page_count * page_size,
            })
        })
    }
}

// Helper methods
impl SqliteStore {
    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let metadata_str: String = row.get(2)?;
        let metadata: BTreeMap<String, MetadataValue> =
            serde_json::from_str(&metadata_str).unwrap_or_default();

        Ok(Document {
            id: row.get(0)?,
            content: row.get(1)?,
            metadata,
        })
    }

    /// `AND json_extract(...) = ?n` per condition, plus the bound values.
    ///
    /// Keys are inlined into the JSON path so the expression indexes apply,
    /// hence the restriction to `[A-Za-z0-9_]`.
    fn filter_clause(filter: &MetadataFilter) -> Result<(String, Vec<String>)> {
        let mut clause = String::new();
        let mut values = Vec::new();
        for (key, value) in filter.conditions() {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(KaiError::invalid_argument(format!(
                    "unsupported metadata key: {:?}",
                    key
                )));
            }
            values.push(value.clone());
            clause.push_str(&format!(
                " AND json_extract(metadata, '$.{}') = ?{}",
                key,
                values.len()
            ));
        }
        Ok((clause, values))
    }

    fn count_by(conn: &Connection, key: &str) -> Result<BTreeMap<String, u64>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT COALESCE(json_extract(metadata, '$.{}'), '(none)'), COUNT(*) \
                 FROM documents GROUP BY 1",
                key
            ))
            .map_err(|e| KaiError::database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))
            .map_err(|e| KaiError::database(e.to_string()))?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map_err(|e| KaiError::database(e.to_string()))?;

        Ok(rows)
    }

    /// Convert f32 vector to bytes (little-endian).
    fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// `1 - cos(a, b)`; 1.0 when either vector is zero.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}
