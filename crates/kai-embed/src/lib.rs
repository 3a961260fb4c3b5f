//! kai-embed - Vector encoders for the kai pipeline
//!
//! # Features
//!
//! - ONNX Runtime integration for e5/jina-style sentence encoders
//! - Query/passage task modes (marker prefixes, optional task-id input)
//! - Mean pooling with attention mask and L2 normalization
//! - A deterministic bag-of-words mock for tests

mod mock;
mod onnx;

pub use mock::MockEncoder;
pub use onnx::OnnxEncoder;

// Re-export the encoder trait for convenience
pub use kai_core::{EncodeTask, VectorEncoder};
