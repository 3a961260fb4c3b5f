//! ONNX-based vector encoder.

use std::borrow::Cow;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use kai_core::{EmbeddingConfig, EncodeTask, KaiError, Result, VectorEncoder};

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Sentence encoder running an e5-style (or jina-style, with a task input)
/// model through ONNX Runtime. Output is mean-pooled and L2-normalized.
pub struct OnnxEncoder {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    tokenizer: Arc<Tokenizer>,

    dimension: usize,
    max_length: usize,
    batch_size: usize,

    /// Input name and per-task ids, for models that take a task id.
    task_input: Option<TaskInput>,
}

#[derive(Debug, Clone)]
struct TaskInput {
    name: String,
    query_id: i64,
    passage_id: i64,
}

impl TaskInput {
    fn id_for(&self, task: EncodeTask) -> i64 {
        match task {
            EncodeTask::Query => self.query_id,
            EncodeTask::Passage => self.passage_id,
        }
    }
}

impl OnnxEncoder {
    /// Load `model.onnx` and `tokenizer.json` from the configured model directory.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let dir = &config.model_path;
        let model_path = dir.join(MODEL_FILE);
        let tokenizer_path = dir.join(TOKENIZER_FILE);

        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| KaiError::encoder(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| KaiError::encoder(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(config.num_threads.max(1))
            .map_err(|e| KaiError::encoder(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| KaiError::encoder(format!("Failed to load model: {}", e)))?;

        let tokenizer = load_tokenizer(&tokenizer_path)?;

        let task_input = config.task_input.as_ref().map(|name| TaskInput {
            name: name.clone(),
            query_id: config.query_task_id,
            passage_id: config.passage_task_id,
        });

        info!(
            "Encoder initialized: dim={}, max_length={}, task_input={:?}",
            config.dimension,
            config.max_length,
            task_input.as_ref().map(|t| t.name.as_str())
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer: Arc::new(tokenizer),
            dimension: config.dimension,
            max_length: config.max_length,
            batch_size: config.batch_size.max(1),
            task_input,
        })
    }

    /// Whether a model directory looks loadable.
    pub fn model_present(config: &EmbeddingConfig) -> bool {
        config.model_path.join(MODEL_FILE).exists() && config.model_path.join(TOKENIZER_FILE).exists()
    }

    fn encode_batch(&self, texts: &[&str], task: EncodeTask) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| KaiError::encoder(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_length);

        let batch_size = encodings.len();

        debug!("Encoding batch: size={}, max_len={}, task={:?}", batch_size, max_len, task);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| KaiError::encoder(format!("Failed to create input tensor: {}", e)))?;

        let attention_mask_tensor =
            Tensor::from_array((vec![batch_size, max_len], attention_mask))
                .map_err(|e| KaiError::encoder(format!("Failed to create mask tensor: {}", e)))?;

        let mut inputs = ort::inputs![
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor
        ];

        if let Some(task_input) = &self.task_input {
            let task_tensor = Tensor::from_array((vec![1usize], vec![task_input.id_for(task)]))
                .map_err(|e| KaiError::encoder(format!("Failed to create task tensor: {}", e)))?;
            inputs.push((
                Cow::Owned(task_input.name.clone()),
                SessionInputValue::from(task_tensor),
            ));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|e| KaiError::encoder(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| KaiError::encoder(format!("Inference failed: {}", e)))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| KaiError::encoder("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| KaiError::encoder(format!("Failed to extract tensor: {}", e)))?;

        let shape_dims: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape_dims);

        match shape_dims.len() {
            // (batch, seq, hidden): pool over the sequence
            3 => Ok(mean_pool(&view, &encodings, max_len)),
            // (batch, hidden): already pooled
            2 => {
                let hidden_dim = shape_dims[1];
                Ok((0..batch_size)
                    .map(|i| l2_normalize((0..hidden_dim).map(|j| view[[i, j]]).collect()))
                    .collect())
            }
            _ => Err(KaiError::encoder(format!(
                "Unexpected output shape: {:?}",
                shape_dims
            ))),
        }
    }
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    info!("Loading tokenizer from {:?}", path);
    Tokenizer::from_file(path)
        .map_err(|e| KaiError::encoder(format!("Failed to load tokenizer: {}", e)))
}

/// Mean pooling over the sequence dimension, weighted by the attention mask.
fn mean_pool(
    tensor: &ArrayViewD<'_, f32>,
    encodings: &[tokenizers::Encoding],
    max_len: usize,
) -> Vec<Vec<f32>> {
    let shape = tensor.shape();
    let seq_len = shape[1];
    let hidden_dim = shape[2];

    encodings
        .iter()
        .enumerate()
        .map(|(i, encoding)| {
            let mask = encoding.get_attention_mask();
            let mut sum = vec![0.0f32; hidden_dim];
            let mut count = 0usize;
            for (j, &m) in mask.iter().take(max_len.min(seq_len)).enumerate() {
                if m == 1 {
                    count += 1;
                    for (k, s) in sum.iter_mut().enumerate() {
                        *s += tensor[[i, j, k]];
                    }
                }
            }
            if count == 0 {
                return sum;
            }
            l2_normalize(sum.into_iter().map(|s| s / count as f32).collect())
        })
        .collect()
}

/// L2 normalize a vector.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl VectorEncoder for OnnxEncoder {
    async fn encode(&self, texts: &[&str], task: EncodeTask) -> Result<Vec<Vec<f32>>> {
        // Session is behind a Mutex; inference runs on the calling task.
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.encode_batch(batch, task)?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_task_ids() {
        let t = TaskInput {
            name: "task_id".to_string(),
            query_id: 0,
            passage_id: 1,
        };
        assert_eq!(t.id_for(EncodeTask::Query), 0);
        assert_eq!(t.id_for(EncodeTask::Passage), 1);
    }

    #[test]
    fn test_model_present_false_for_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            model_path: dir.path().to_path_buf(),
            ..EmbeddingConfig::default()
        };
        assert!(!OnnxEncoder::model_present(&config));
        assert!(OnnxEncoder::from_config(&config).is_err());
    }
}
