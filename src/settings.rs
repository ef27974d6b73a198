//! Assistant tunables and the shared command-line/environment surface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::embedder::hashing::{HashingEmbedder, DEFAULT_HASHING_DIMENSION};
use crate::error::{AssistantError, Result};

/// Default number of competencies returned per query.
pub const DEFAULT_TOP_N: usize = 3;
/// Default similarity threshold; scores must be strictly greater.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.4;
/// Default course titles kept per competency.
pub const DEFAULT_MAX_COURSES: usize = 5;
/// Default catalog search page queried by the course scraper.
pub const DEFAULT_COURSE_SEARCH_URL: &str = "https://coniverse.com/search/learning/courses";

/// Knobs that bound retrieval and course lookup for a session.
#[derive(Clone, Debug, PartialEq)]
pub struct AssistantSettings {
    embed_model: String,
    collection: String,
    top_n: usize,
    similarity_threshold: f32,
    max_courses: usize,
    corpus_path: PathBuf,
    llm_model: Option<String>,
}

impl AssistantSettings {
    /// Constructs a new set of assistant settings.
    pub fn new(
        embed_model: String,
        collection: String,
        top_n: usize,
        similarity_threshold: f32,
        max_courses: usize,
        corpus_path: PathBuf,
        llm_model: Option<String>,
    ) -> Self {
        Self {
            embed_model,
            collection,
            top_n,
            similarity_threshold,
            max_courses,
            corpus_path,
            llm_model,
        }
    }

    /// Embedding model identifier.
    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Name of the vector collection holding competency embeddings.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Maximum competencies returned per query.
    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Exclusive lower bound on similarity scores.
    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Maximum course titles requested per competency.
    pub fn max_courses(&self) -> usize {
        self.max_courses
    }

    /// Location of the competency corpus.
    pub fn corpus_path(&self) -> &Path {
        &self.corpus_path
    }

    /// Text-generation model identifier, `None` when generation is disabled.
    pub fn llm_model(&self) -> Option<&str> {
        self.llm_model.as_deref()
    }
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            embed_model: EmbedBackend::Fastembed
                .default_model()
                .unwrap_or_default()
                .to_string(),
            collection: "competencies".to_string(),
            top_n: DEFAULT_TOP_N,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_courses: DEFAULT_MAX_COURSES,
            corpus_path: PathBuf::from("./data/competencies.csv"),
            llm_model: LlmBackend::Openai.default_model().map(str::to_string),
        }
    }
}

/// Embedding backend used to encode competencies and queries.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbedBackend {
    /// Local sentence-transformer model run through fastembed.
    Fastembed,
    /// FNV-1a feature hashing; offline fallback with no model download.
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Qdrant Cloud Inference endpoint.
    Qdrant,
}

impl EmbedBackend {
    /// Model used when `--embed-model` is not given. The hashing backend
    /// names its model after the vector size instead.
    pub fn default_model(self) -> Option<&'static str> {
        match self {
            EmbedBackend::Fastembed => Some("all-MiniLM-L6-v2"),
            EmbedBackend::Hashing => None,
            EmbedBackend::Openai => Some("text-embedding-3-small"),
            EmbedBackend::Qdrant => Some("sentence-transformers/all-minilm-l6-v2"),
        }
    }
}

/// Text-generation provider for the recommendation composer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LlmBackend {
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages API.
    Anthropic,
    /// No generator; the composer answers with its fixed fallback.
    None,
}

impl LlmBackend {
    /// Model used when `--llm-model` is not given.
    pub fn default_model(self) -> Option<&'static str> {
        match self {
            LlmBackend::Openai => Some("gpt-4o"),
            LlmBackend::Anthropic => Some("claude-3-5-sonnet-latest"),
            LlmBackend::None => None,
        }
    }
}

/// Command-line and environment settings shared by the learnpath binaries.
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Competency CSV (columns: competency, description)
    #[arg(
        long,
        env = "LEARNPATH_COMPETENCY_DATA",
        default_value = "./data/competencies.csv"
    )]
    pub corpus: PathBuf,

    /// Field delimiter used by the competency file
    #[arg(long, env = "LEARNPATH_CORPUS_DELIMITER", default_value_t = ',')]
    pub corpus_delimiter: char,

    /// Vector collection name
    #[arg(long, env = "LEARNPATH_COLLECTION", default_value = "competencies")]
    pub collection: String,

    /// Number of competencies returned per query
    #[arg(long, env = "LEARNPATH_TOP_N", default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    /// Similarity threshold (scores must be strictly greater)
    #[arg(long, env = "LEARNPATH_SIMILARITY_THRESHOLD", default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    pub similarity_threshold: f32,

    /// Course titles kept per competency
    #[arg(long, env = "LEARNPATH_MAX_COURSES", default_value_t = DEFAULT_MAX_COURSES)]
    pub max_courses: usize,

    /// Embedding backend
    #[arg(long, env = "LEARNPATH_EMBED_BACKEND", value_enum, default_value_t = EmbedBackend::Fastembed)]
    pub embed_backend: EmbedBackend,

    /// Embedding model identifier (defaults per backend)
    #[arg(long, env = "LEARNPATH_EMBED_MODEL")]
    pub embed_model: Option<String>,

    /// Directory caching downloaded local embedding models
    #[arg(long, env = "LEARNPATH_MODEL_CACHE")]
    pub model_cache_dir: Option<PathBuf>,

    /// Embedding dimension (hashing backend size; optional override for OpenAI)
    #[arg(long, env = "LEARNPATH_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Max texts per embedding request
    #[arg(long, env = "LEARNPATH_EMBED_BATCH", default_value_t = 100)]
    pub embed_batch_size: usize,

    /// Seconds before embedding requests time out
    #[arg(long, env = "LEARNPATH_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,

    /// Retry attempts for transient embedding errors
    #[arg(long, env = "LEARNPATH_EMBED_MAX_RETRIES", default_value_t = 5)]
    pub embed_max_retries: usize,

    /// Max cached query embeddings (0 disables caching)
    #[arg(long, env = "LEARNPATH_QUERY_CACHE", default_value_t = 256)]
    pub query_cache_size: usize,

    /// OpenAI API key (embeddings and chat)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints
    #[arg(
        long,
        env = "LEARNPATH_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Qdrant API key for the inference endpoint
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Qdrant inference endpoint, e.g. https://cluster-id.cloud.qdrant.io/inference/text
    #[arg(long, env = "LEARNPATH_QDRANT_ENDPOINT")]
    pub qdrant_endpoint: Option<String>,

    /// Text-generation provider
    #[arg(long, env = "LEARNPATH_LLM_PROVIDER", value_enum, default_value_t = LlmBackend::Openai)]
    pub llm_provider: LlmBackend,

    /// Text-generation model identifier (defaults per provider)
    #[arg(long, env = "LEARNPATH_LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Anthropic API key (required with --llm-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Sampling temperature for recommendations
    #[arg(long, env = "LEARNPATH_LLM_TEMPERATURE", default_value_t = 0.3)]
    pub temperature: f32,

    /// Maximum completion tokens for recommendations
    #[arg(long, env = "LEARNPATH_LLM_MAX_TOKENS", default_value_t = 1200)]
    pub max_completion_tokens: usize,

    /// Seconds before text-generation requests time out
    #[arg(long, env = "LEARNPATH_LLM_TIMEOUT_SECS", default_value_t = 60)]
    pub llm_timeout_secs: u64,

    /// Course catalog search page
    #[arg(long, env = "LEARNPATH_COURSE_SEARCH_URL", default_value = DEFAULT_COURSE_SEARCH_URL)]
    pub course_search_url: String,

    /// Seconds to wait for each course search page
    #[arg(long, env = "LEARNPATH_COURSE_TIMEOUT_SECS", default_value_t = 30)]
    pub course_timeout_secs: u64,

    /// Attempts per course search before reporting a failure
    #[arg(long, env = "LEARNPATH_COURSE_MAX_RETRIES", default_value_t = 2)]
    pub course_max_retries: usize,
}

impl SettingsArgs {
    /// Converts the parsed arguments into `AssistantSettings`.
    pub fn build_settings(&self) -> AssistantSettings {
        AssistantSettings::new(
            self.resolved_embed_model(),
            self.collection.clone(),
            self.top_n,
            self.similarity_threshold,
            self.max_courses,
            self.corpus.clone(),
            self.resolved_llm_model(),
        )
    }

    /// Vector size requested from the hashing backend.
    pub fn hashing_dimension(&self) -> usize {
        self.embed_dimensions.unwrap_or(DEFAULT_HASHING_DIMENSION)
    }

    /// Embedding model for the selected backend.
    pub fn resolved_embed_model(&self) -> String {
        if self.embed_backend == EmbedBackend::Hashing {
            return HashingEmbedder::model_id_for(self.hashing_dimension());
        }
        match (&self.embed_model, self.embed_backend.default_model()) {
            (Some(model), _) => model.clone(),
            (None, Some(model)) => model.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Text-generation model for the selected provider.
    pub fn resolved_llm_model(&self) -> Option<String> {
        if self.llm_provider == LlmBackend::None {
            return None;
        }
        self.llm_model
            .clone()
            .or_else(|| self.llm_provider.default_model().map(str::to_string))
    }

    /// Rejects values that would make retrieval meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.similarity_threshold.is_finite() || !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(AssistantError::config(format!(
                "similarity threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(AssistantError::config("embedding batch size must be positive"));
        }
        if self.collection.trim().is_empty() {
            return Err(AssistantError::config("collection name must not be blank"));
        }
        self.corpus_delimiter_byte()?;
        Ok(())
    }

    /// Corpus delimiter as the single byte the CSV reader expects.
    pub fn corpus_delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.corpus_delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                AssistantError::config(format!(
                    "corpus delimiter {:?} is not a single ASCII character",
                    self.corpus_delimiter
                ))
            })
    }

    /// Request timeout for embedding calls.
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs.max(1))
    }

    /// Request timeout for text-generation calls.
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }

    /// Request timeout for course search pages.
    pub fn course_timeout(&self) -> Duration {
        Duration::from_secs(self.course_timeout_secs.max(1))
    }
}
