//! Deterministic encoder for tests and model-less setups.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use kai_core::{EncodeTask, KaiError, Result, VectorEncoder};

use crate::onnx::l2_normalize;

/// Bag-of-words hashing encoder.
///
/// Each lowercase word (task marker stripped) is hashed into one dimension,
/// so texts sharing words land close together under cosine distance.
pub struct MockEncoder {
    dimension: usize,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockEncoder {
    /// Create a new mock encoder with default settings.
    pub fn new() -> Self {
        Self::with_dimension(384)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// An encoder whose every call errors.
    pub fn failing() -> Self {
        let encoder = Self::new();
        encoder.set_failing(true);
        encoder
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of `encode` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str, task: EncodeTask) -> Vec<f32> {
        let body = text.strip_prefix(task.prefix()).unwrap_or(text);
        let mut v = vec![0.0f32; self.dimension];
        for word in body
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let hash = word
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                    (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
                });
            v[(hash % self.dimension as u64) as usize] += 1.0;
        }
        l2_normalize(v)
    }
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorEncoder for MockEncoder {
    async fn encode(&self, texts: &[&str], task: EncodeTask) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KaiError::encoder("mock encoder unavailable"));
        }
        Ok(texts.iter().map(|t| self.embed_one(t, task)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_encoder_normalized() {
        let encoder = MockEncoder::new();
        let out = encoder
            .encode(&["passage: Розклад пар ФКНТ", "passage: Конференція"], EncodeTask::Passage)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 384);
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let encoder = MockEncoder::new();
        let q = encoder
            .encode(&["query: завідувач кафедри"], EncodeTask::Query)
            .await
            .unwrap();
        let docs = encoder
            .encode(
                &["passage: завідувач кафедри ІПЗ", "passage: спортивний турнір"],
                EncodeTask::Passage,
            )
            .await
            .unwrap();
        assert!(cosine(&q[0], &docs[0]) > cosine(&q[0], &docs[1]));
    }

    #[tokio::test]
    async fn test_deterministic() {
        let encoder = MockEncoder::new();
        let a = encoder.encode(&["query: вступ"], EncodeTask::Query).await.unwrap();
        let b = encoder.encode(&["вступ"], EncodeTask::Query).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(encoder.calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_encoder() {
        let encoder = MockEncoder::failing();
        let err = encoder.encode(&["x"], EncodeTask::Query).await.unwrap_err();
        assert_eq!(err.error_code(), "ENCODER_ERROR");
        encoder.set_failing(false);
        assert!(encoder.encode(&["x"], EncodeTask::Query).await.is_ok());
    }
}
