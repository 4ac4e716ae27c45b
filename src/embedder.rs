//! Text embedding for the vector index.
//!
//! Production encoding runs on fastembed's all-MiniLM-L6-v2 sentence model
//! (384 dimensions, ONNX, downloaded on first use). The model identity is a
//! deployment invariant: every vector in one database must come from the same
//! model, so the encoder verifies its output dimension on first use and
//! exposes `model_id` for bookkeeping.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::error::{AppError, AppResult};

/// Fixed dimension of the sentence encoder and of the vector index.
pub const EMBEDDING_DIM: usize = 384;

const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Batch size for embedding inference.
const EMBED_BATCH_SIZE: usize = 32;

/// Batch text encoder. The store only ever sees this trait, which keeps the
/// model swappable and lets tests run without downloading weights.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model_id(&self) -> &str;
}

/// MiniLM encoder, lazily initialised on first use (model weights are
/// downloaded from HuggingFace Hub and cached locally).
pub struct MiniLmEncoder {
    /// `embed` takes `&self` but the tokenizer is not Sync.
    model: Mutex<Option<TextEmbedding>>,
    initialized: AtomicBool,
}

impl Default for MiniLmEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniLmEncoder {
    pub fn new() -> Self {
        Self { model: Mutex::new(None), initialized: AtomicBool::new(false) }
    }

    fn ensure_model(&self) -> AppResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut guard = self
            .model
            .lock()
            .map_err(|e| AppError::Embedding(format!("model lock poisoned: {e}")))?;

        // Double-check after acquiring the lock.
        if guard.is_some() {
            self.initialized.store(true, Ordering::Release);
            return Ok(());
        }

        info!("Initializing sentence encoder ({MODEL_ID}, {EMBEDDING_DIM}d)...");

        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|e| AppError::Embedding(format!("failed to init sentence encoder: {e}")))?;

        *guard = Some(model);
        self.initialized.store(true, Ordering::Release);
        info!("Sentence encoder ready ({EMBEDDING_DIM}d)");
        Ok(())
    }
}

impl TextEncoder for MiniLmEncoder {
    fn encode(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_model()?;

        let mut guard = self
            .model
            .lock()
            .map_err(|e| AppError::Embedding(format!("model lock poisoned: {e}")))?;
        let model = guard
            .as_mut()
            .ok_or_else(|| AppError::Embedding("sentence encoder not initialized".into()))?;

        let embeddings = model
            .embed(texts.to_vec(), Some(EMBED_BATCH_SIZE))
            .map_err(|e| AppError::Embedding(format!("embedding failed: {e}")))?;

        if let Some(first) = embeddings.first() {
            if first.len() != EMBEDDING_DIM {
                return Err(AppError::Fatal(format!(
                    "encoder dimension mismatch: expected {EMBEDDING_DIM} but got {}",
                    first.len()
                )));
            }
        }

        Ok(embeddings)
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

/// Deterministic hashing encoder: each token is hashed into one of 384
/// buckets and the resulting bag-of-words vector is L2-normalised. Texts
/// sharing vocabulary land close together, which is enough for tests and
/// offline tooling that must not download model weights.
pub struct HashingEncoder;

impl TextEncoder for HashingEncoder {
    fn encode(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }

    fn model_id(&self) -> &str {
        "hashing-bag-of-words-384"
    }
}

fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0f32; EMBEDDING_DIM];
    for token in text.to_lowercase().split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric());
        if token.is_empty() {
            continue;
        }
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        v[(hasher.finish() % EMBEDDING_DIM as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Serialise an embedding as packed little-endian IEEE-754 float32, the byte
/// layout of the vector index (384 × 4 = 1536 bytes).
pub fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_layout_is_packed_le_f32() {
        let v = vec![1.0f32, -0.5, 0.25];
        let bytes = vector_to_bytes(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(bytes_to_vector(&bytes), v);
    }

    #[test]
    fn hashing_encoder_is_deterministic_and_normalised() {
        let enc = HashingEncoder;
        let a = enc.encode(&["rust async runtime".to_string()]).unwrap();
        let b = enc.encode(&["rust async runtime".to_string()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), EMBEDDING_DIM);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_reduces_distance() {
        let enc = HashingEncoder;
        let vs = enc
            .encode(&[
                "python concurrency patterns explained".to_string(),
                "python concurrency in practice".to_string(),
                "gardening tips for spring tomatoes".to_string(),
            ])
            .unwrap();
        let d_close = l2(&vs[0], &vs[1]);
        let d_far = l2(&vs[0], &vs[2]);
        assert!(d_close < d_far);
    }

    fn l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
    }
}
