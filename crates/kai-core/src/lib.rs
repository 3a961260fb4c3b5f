//! kai-core - Core types and traits for the kai retrieval pipeline
//!
//! This crate provides the data model, the collaborator traits (reasoning
//! service, vector encoder, document store), error handling, configuration
//! and the organizational hierarchy shared by every other kai crate.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod traits;
pub mod tuning;
pub mod types;

pub use config::*;
pub use error::{KaiError, Result};
pub use hierarchy::{Department, EntityIndex, EntityKind, EntityMatch, Faculty, OrgHierarchy};
pub use traits::*;
pub use types::*;
