//! Error taxonomy shared by the library modules.
//!
//! Startup failures (`DataLoad`, `IndexBackend`, `Config`) are fatal and bubble
//! up to the binary. `Retrieval` and `Composition` are caught by the workflow
//! and turned into user-visible messages. Course lookup failures are not errors
//! at all; see [`crate::courses::CourseLookup::Failed`].

use std::path::PathBuf;

/// Top-level error type for learnpath operations.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Competency corpus missing, unreadable, or malformed.
    #[error("data load error: {message}")]
    DataLoad {
        /// What went wrong.
        message: String,
    },

    /// The vector collection could not be created or populated.
    #[error("index backend error: {0}")]
    IndexBackend(String),

    /// Embedding or similarity search failed for a query.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Text generation failed or returned nothing usable.
    #[error("composition error: {0}")]
    Composition(String),

    /// Session file could not be read or written.
    #[error("session error at {path:?}: {message}")]
    Session {
        /// Session file involved.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Invalid or incomplete configuration.
    #[error("config error: {message}")]
    Config {
        /// What went wrong.
        message: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AssistantError>;

impl AssistantError {
    /// Create a data load error from any displayable message.
    pub fn data_load(msg: impl Into<String>) -> Self {
        Self::DataLoad {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a session error for `path`.
    pub fn session(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Session {
            path: path.into(),
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = AssistantError::data_load("no rows");
        assert_eq!(err.to_string(), "data load error: no rows");

        let err = AssistantError::Retrieval("embedding timed out".into());
        assert!(err.to_string().contains("embedding timed out"));

        let err = AssistantError::session("/tmp/s.json", "bad json");
        assert!(err.to_string().starts_with("session error at"));
    }
}
