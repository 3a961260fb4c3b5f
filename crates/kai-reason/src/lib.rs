//! kai-reason - Reasoning service clients
//!
//! # Features
//!
//! - OpenAI-compatible `/v1/chat/completions` client with bearer auth and
//!   a client-level timeout
//! - Scripted mock service for exercising retry and fallback paths

mod http;
mod mock;

pub use http::HttpReasoner;
pub use mock::{MockReasoner, MockReply};

pub use kai_core::ReasoningService;
