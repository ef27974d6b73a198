//! Embedding backends used to encode competencies and queries.

use anyhow::Result;

pub mod hashing;
#[cfg(feature = "local-model")]
pub mod local;
pub mod openai;
pub mod qdrant;

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-model")]
pub use local::FastEmbedEmbedder;
pub use openai::OpenAiEmbedder;
pub use qdrant::QdrantEmbedder;

/// Text-to-vector encoder.
///
/// The same embedder must encode both the corpus and every query; the
/// [`crate::retrieval::CompetencyIndex`] owns its embedder to enforce that.
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;

    /// Maximum number of inputs accepted per `embed_batch` call.
    fn batch_size(&self) -> usize;

    /// Encodes `inputs` in order, returning one vector per input.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Encodes a single string.
    fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[input])?;
        anyhow::ensure!(
            vectors.len() == 1,
            "embedder returned {} vectors for one input",
            vectors.len()
        );
        Ok(vectors.remove(0))
    }
}

pub(crate) fn retry_backoff(attempt: usize) -> std::time::Duration {
    let capped = attempt.min(5) as u32;
    std::time::Duration::from_millis(500 * (1 << capped))
}

pub(crate) fn should_retry(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
