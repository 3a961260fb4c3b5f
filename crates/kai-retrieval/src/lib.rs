//! kai-retrieval - Retrieval-and-validation pipeline
//!
//! This crate turns a question into grounded evidence: it routes the
//! question, runs hybrid (vector + lexical) search, fuses the results and
//! lets a reasoning model validate them, reformulating the query when needed.
//!
//! # Features
//!
//! - Model-driven routing with a deterministic heuristic fallback
//! - Hybrid search with score-based fusion and route bonuses
//! - Generic structured completion with bounded retry
//! - Validate-or-reformulate loop with a hard attempt budget
//!
//! # Example
//!
//! ```rust,ignore
//! use kai_retrieval::Retriever;
//! use std::sync::Arc;
//!
//! let retriever = Retriever::build(reasoner, encoder, store, entities, &config);
//! let exchange = retriever.ask("Хто завідувач ІПЗ?", &history, Some("Б-121-22-1-КІ")).await;
//! ```

mod fusion;
mod lexical;
mod orchestrator;
mod router;
mod search;
mod structured;
mod validator;
mod vector;

pub use fusion::{apply_route_bonuses, fuse, vector_seed};
pub use lexical::{extract_keywords, fuzzy_ratio, lexical_search, score, STOP_WORDS};
pub use orchestrator::{initial_query, Exchange, GiveUpReason, Retriever, TerminalState};
pub use router::{detect_intent, enhancement_keywords, needs_search, QueryRouter, RouteOrigin};
pub use search::{HybridSearch, SearchOutcome};
pub use structured::{
    complete_structured, extract_json_object, parse_reply, RetryPolicy, StructuredOutcome,
    StructuredReply,
};
pub use validator::{condensed_view, permissive_default, ResultValidator, Validation, Verdict};
pub use vector::{build_filter, intent_category, relevance_from_distance, VectorSearch};
