//! kai-server: service facade for the kai retrieval pipeline.
//!
//! Wires the store, encoder, reasoning service, retriever and timetable
//! cache together and exposes them as tools returning [`ToolResult`].
//!
//! # Tools
//!
//! - `kai_ask` - Route, search and validate evidence for a question
//! - `kai_route` - Routing decision only
//! - `kai_import` - Encode and store a batch of documents
//! - `kai_stats` - Knowledge store statistics and reasoning-service health
//! - `kai_timetable` - Lessons of a student group on a date, with the current
//!   and next lesson

mod server;

pub use server::{
    AskParams, ImportDocument, KaiServer, ServerInfo, TimetableParams, ToolInfo, ToolResult,
};
