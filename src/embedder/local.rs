//! Sentence-transformer embeddings computed in-process with fastembed.
//!
//! Model files are fetched on first use and cached under `cache_dir` (or
//! fastembed's default cache when unset). Vectors are mean-pooled and
//! normalized by fastembed.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{debug, info};

use super::Embedder;

/// Model used when none is configured.
pub const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

/// Local ONNX sentence-transformer embedder.
pub struct FastEmbedEmbedder {
    model_id: String,
    batch_size: usize,
    model: Mutex<TextEmbedding>,
}

impl FastEmbedEmbedder {
    /// Loads `model`, downloading it into `cache_dir` when not yet cached.
    pub fn new(model: &str, cache_dir: Option<PathBuf>, batch_size: usize) -> Result<Self> {
        let (model_id, kind) = resolve_model(model)?;
        info!(model = model_id, "loading local embedding model");
        let mut options = InitOptions::new(kind).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let embedding = TextEmbedding::try_new(options)
            .with_context(|| format!("failed to load embedding model {model_id}"))?;
        Ok(Self {
            model_id: model_id.to_string(),
            batch_size: batch_size.max(1),
            model: Mutex::new(embedding),
        })
    }
}

impl Embedder for FastEmbedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = inputs.len(), model = %self.model_id, "embedding locally");
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow!("embedding model lock poisoned"))?;
        let vectors = model.embed(inputs.to_vec(), Some(self.batch_size))?;
        anyhow::ensure!(
            vectors.len() == inputs.len(),
            "model returned {} vectors for {} inputs",
            vectors.len(),
            inputs.len()
        );
        Ok(vectors)
    }
}

/// Maps a configured model name onto a supported fastembed model.
///
/// Accepts the bare name or the `sentence-transformers/` / `BAAI/` prefixed
/// Hugging Face id, case-insensitively.
pub fn resolve_model(name: &str) -> Result<(&'static str, EmbeddingModel)> {
    let lower = name.trim().to_ascii_lowercase();
    let bare = lower
        .strip_prefix("sentence-transformers/")
        .or_else(|| lower.strip_prefix("baai/"))
        .unwrap_or(&lower);
    match bare {
        "all-minilm-l6-v2" => Ok((DEFAULT_LOCAL_MODEL, EmbeddingModel::AllMiniLML6V2)),
        "bge-small-en-v1.5" => Ok(("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15)),
        _ => bail!("unsupported local embedding model {name:?}"),
    }
}
