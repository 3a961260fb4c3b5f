//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Documents with their passage embeddings
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB,
    added_at INTEGER NOT NULL
);

-- Routing filters always constrain these keys
CREATE INDEX IF NOT EXISTS idx_documents_source
    ON documents(json_extract(metadata, '$.source'));
CREATE INDEX IF NOT EXISTS idx_documents_faculty
    ON documents(json_extract(metadata, '$.faculty'));
CREATE INDEX IF NOT EXISTS idx_documents_category
    ON documents(json_extract(metadata, '$.category'));

CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
