use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::keyword::tokenize_ordered;

/// Text embedding collaborator.
///
/// Implementations must be deterministic for the same input and safe to
/// call from multiple threads; the gateway treats embedding as potentially
/// blocking and offloads it to a worker where needed.
pub trait TextEmbedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Feature-hashing embedder.
///
/// Hashes unigrams and adjacent-word bigrams into a fixed-dimension signed
/// vector and L2-normalizes. No model weights, no external service, fully
/// deterministic across processes (token hashes come from SHA-256, not the
/// std hasher). Texts sharing vocabulary land close in cosine space, which
/// is what tool retrieval needs; swap in a real model behind the same trait
/// when quality matters more than footprint.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIM: usize = 384;

    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn token_slot(&self, token: &str) -> (usize, f32) {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let raw = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let index = (raw % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

impl TextEmbedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize_ordered(text);
        let mut vector = vec![0.0f32; self.dim];

        for token in &tokens {
            let (index, sign) = self.token_slot(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            let (index, sign) = self.token_slot(&bigram);
            vector[index] += 0.5 * sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Cosine similarity between two vectors of equal length.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("send an email to my boss").unwrap();
        let b = embedder.embed("send an email to my boss").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HashingEmbedder::DEFAULT_DIM);
    }

    #[test]
    fn test_embedding_normalized() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("schedule a meeting tomorrow").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_texts_score_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("send an email message").unwrap();
        let email = embedder
            .embed("Send an email message Tags: email, communication")
            .unwrap();
        let payments = embedder
            .embed("Charge a credit card Tags: payments, stripe")
            .unwrap();

        let sim_email = cosine_similarity(&query, &email);
        let sim_payments = cosine_similarity(&query, &payments);
        assert!(sim_email > sim_payments);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
