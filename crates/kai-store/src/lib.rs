//! kai-store - SQLite document store
//!
//! Persistent storage for knowledge-base documents, their metadata and
//! passage embeddings. Metadata filters compile to `json_extract` equality
//! predicates; nearest-neighbour search is exact cosine distance over the
//! filtered rows.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::{SCHEMA, SCHEMA_VERSION};
