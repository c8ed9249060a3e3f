use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Maps text to a fixed-width vector where cosine similarity is meaningful.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dim(&self) -> usize;
}

pub type SharedEmbedder = Arc<dyn Embedder>;

/// Feature-hashed bag-of-words embedder.
///
/// Each lowercased token is hashed into one of `dim` buckets with a ±1 sign
/// drawn from a second hash, then the vector is L2-normalized.  Texts sharing
/// vocabulary land close under cosine; no model download, no external
/// runtime.  We implement the projection ourselves rather than pulling an ML
/// stack for what retrieval here actually needs.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(16) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
        {
            let mut bucket_hasher = DefaultHasher::new();
            token.hash(&mut bucket_hasher);
            let h = bucket_hasher.finish();
            let bucket = (h % self.dim as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Cosine similarity; 0.0 for mismatched or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("open the notepad application");
        let b = embedder.embed("please open notepad now");
        let c = embedder.embed("quarterly finance report spreadsheet totals");
        assert!(cosine(&a, &b) > cosine(&a, &c));
    }

    #[test]
    fn embedding_is_normalized() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("some reasonably long input text here");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn identical_text_is_self_similar() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("search for the latest python release");
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-4);
    }
}
