//! Embedding Backends
//!
//! The engine only sees [`Embedder`]: an opaque `embed(text) -> vector`.
//! [`HashEmbedder`] is a deterministic feature-hashing embedder that needs no
//! model files. With the `embeddings` feature, [`FastEmbedder`] runs
//! all-MiniLM-L6-v2 locally through `fastembed`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::HmemResult;
#[cfg(feature = "embeddings")]
use crate::HmemError;

/// Default dimensions of the hashing embedder
pub const HASH_DIMENSIONS: usize = 256;

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> HmemResult<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0. Mismatched lengths or zero vectors
/// score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Scale a vector to unit length in place
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Keyword overlap relevance for records without an embedding
pub fn lexical_relevance(content: &str, query: &str) -> f64 {
    let content_lower = content.to_lowercase();
    let words: Vec<String> = tokenize(query).collect();
    if words.is_empty() {
        return 0.0;
    }
    let matches = words.iter().filter(|w| content_lower.contains(w.as_str())).count();
    (matches as f64 / words.len() as f64).min(1.0)
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Deterministic feature-hashing embedder
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_DIMENSIONS)
    }
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous embedding
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimensions;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> HmemResult<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Embedding dimensions for all-MiniLM-L6-v2
#[cfg(feature = "embeddings")]
pub const MINILM_DIMENSIONS: usize = 384;

/// Local sentence embeddings via fastembed, loaded lazily
#[cfg(feature = "embeddings")]
pub struct FastEmbedder {
    model: std::sync::Arc<tokio::sync::RwLock<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "embeddings")]
impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "embeddings")]
impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: std::sync::Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    async fn ensure_model(&self) -> HmemResult<()> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        if self.model.read().await.is_some() {
            return Ok(());
        }

        let mut model_guard = self.model.write().await;
        if model_guard.is_some() {
            return Ok(());
        }

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| HmemError::embedding(format!("failed to load model: {}", e)))?;

        tracing::info!(elapsed = ?start.elapsed(), "Embedding model loaded");
        *model_guard = Some(model);
        Ok(())
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }
}

#[cfg(feature = "embeddings")]
#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> HmemResult<Vec<f32>> {
        self.ensure_model().await?;

        let model_guard = self.model.read().await;
        let model = model_guard
            .as_ref()
            .ok_or_else(|| HmemError::embedding("model not initialized"))?;

        model
            .embed(vec![text], None)
            .map_err(|e| HmemError::embedding(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| HmemError::embedding("no embedding generated"))
    }

    fn dimensions(&self) -> usize {
        MINILM_DIMENSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_unit_length() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Q3 planning notes").await.unwrap();
        let b = embedder.embed("Q3 planning notes").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), embedder.dimensions());

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_shared_tokens_are_similar() {
        let embedder = HashEmbedder::default();
        let note = embedder.embed_text("Q3 planning notes");
        let query = embedder.embed_text("planning");
        let unrelated = embedder.embed_text("sourdough starter feeding");

        let related = cosine_similarity(&note, &query);
        assert!(related > 0.3);
        assert!(related > cosine_similarity(&unrelated, &query));
    }

    #[test]
    fn test_empty_text_embeds_to_zero_vector() {
        let v = HashEmbedder::new(8).embed_text("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_lexical_relevance() {
        assert_eq!(lexical_relevance("Q3 planning notes", "planning"), 1.0);
        assert_eq!(lexical_relevance("Q3 planning notes", "planning budget"), 0.5);
        assert_eq!(lexical_relevance("anything", ""), 0.0);
    }

    #[cfg(feature = "embeddings")]
    #[tokio::test]
    #[ignore = "downloads the embedding model"]
    async fn test_fastembed_dimensions() {
        let embedder = FastEmbedder::new();
        let v = embedder.embed("hello world").await.unwrap();
        assert_eq!(v.len(), MINILM_DIMENSIONS);
    }
}
