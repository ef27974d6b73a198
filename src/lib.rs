#![warn(missing_docs)]
//! Core library for the learnpath assistant: competency retrieval, course
//! lookup and the tick-driven recommendation workflow.

pub mod composer;
pub mod corpus;
pub mod courses;
pub mod embedder;
pub mod error;
pub mod index;
pub mod llm;
pub mod retrieval;
pub mod session;
pub mod settings;
pub mod workflow;

pub use composer::RecommendationComposer;
pub use corpus::{load_competencies, read_competencies, CompetencyRecord};
pub use courses::{CatalogScraper, CourseLookup, CourseSource};
pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder, QdrantEmbedder};
#[cfg(feature = "local-model")]
pub use embedder::FastEmbedEmbedder;
pub use error::{AssistantError, Result};
pub use index::{CollectionName, VectorStore};
pub use llm::{AnthropicProvider, LlmProvider, OpenAiProvider, ProviderRequest};
pub use retrieval::{CompetencyIndex, CompetencyMatch, CompetencySearch};
pub use session::{ChatMessage, Phase, Role, SessionState, SessionStore};
pub use settings::{AssistantSettings, EmbedBackend, LlmBackend, SettingsArgs};
pub use workflow::{Event, TickOutput, Work, WorkflowController};
