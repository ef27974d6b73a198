//! FNV-1a feature-hashing embedder, the offline fallback.
//!
//! Each lowercase word token (minus stop words) and each character trigram of
//! that token is hashed into one of `dimension` buckets with a sign bit, then
//! the vector is L2-normalized. It needs no model download and no network, and
//! identical text always yields an identical vector. Scores reflect lexical
//! overlap only, so thresholds tuned for sentence-transformer models do not
//! carry over.

use anyhow::Result;

use super::Embedder;

/// Default vector size, matching common sentence-transformer models.
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "i", "in",
    "into", "is", "it", "me", "my", "of", "on", "or", "so", "that", "the", "their", "this", "to",
    "want", "with", "would", "you", "your",
];

/// Feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl HashingEmbedder {
    /// Builds a hashing embedder producing `dimension`-length vectors.
    pub fn new(dimension: usize, batch_size: usize) -> Result<Self> {
        anyhow::ensure!(dimension > 0, "embedding dimension must be positive");
        Ok(Self {
            model: Self::model_id_for(dimension),
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    /// Model identifier reported for a given vector size, e.g. `fnv1a-hash-384`.
    pub fn model_id_for(dimension: usize) -> String {
        format!("fnv1a-hash-{dimension}")
    }

    /// Output vector length.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            self.accumulate(&mut vector, b'w', &token, WORD_WEIGHT);
            let padded: Vec<char> = std::iter::once('#')
                .chain(token.chars())
                .chain(std::iter::once('#'))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut vector, b'c', &trigram, TRIGRAM_WEIGHT);
            }
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], namespace: u8, feature: &str, weight: f32) {
        let hash = fnv1a(namespace, feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|input| self.encode(input)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(str::to_lowercase)
        .filter(|tok| !STOP_WORDS.contains(&tok.as_str()))
}

fn fnv1a(namespace: u8, bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in std::iter::once(&namespace).chain(bytes) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    fn embedder() -> HashingEmbedder {
        HashingEmbedder::new(DEFAULT_HASHING_DIMENSION, 16).expect("embedder")
    }

    #[test]
    fn identical_text_yields_identical_vectors() {
        let embedder = embedder();
        let a = embedder.embed_one("Data Analysis. Turning data into decisions.").unwrap();
        let b = embedder.embed_one("Data Analysis. Turning data into decisions.").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_HASHING_DIMENSION);
    }

    #[test]
    fn vectors_are_unit_length() {
        let vector = embedder().embed_one("public speaking").unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn stop_words_only_text_is_zero_vector() {
        let vector = embedder().embed_one("to the of my").unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        let embedder = embedder();
        let a = embedder.embed_one("Data, ANALYSIS!").unwrap();
        let b = embedder.embed_one("data analysis").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn overlapping_text_scores_higher_than_unrelated_text() {
        let embedder = embedder();
        let query = embedder.embed_one("improve my data analysis skills").unwrap();
        let related = embedder
            .embed_one("Data Analysis. Analyzing data sets to support decisions.")
            .unwrap();
        let unrelated = embedder
            .embed_one("Public Speaking. Presenting confidently to an audience.")
            .unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn reports_hash_model_id() {
        let embedder = HashingEmbedder::new(128, 4).unwrap();
        assert_eq!(embedder.model_id(), "fnv1a-hash-128");
        assert_eq!(self::embedder().model_id(), "fnv1a-hash-384");
        assert!(HashingEmbedder::new(0, 4).is_err());
    }

    #[test]
    fn batch_preserves_input_order() {
        let embedder = embedder();
        let batch = embedder.embed_batch(&["alpha", "beta"]).unwrap();
        assert_eq!(batch[0], embedder.embed_one("alpha").unwrap());
        assert_eq!(batch[1], embedder.embed_one("beta").unwrap());
    }
}
