//! Course lookup results and the collaborator that produces them.

use serde::{Deserialize, Serialize};

pub mod catalog;

pub use catalog::CatalogScraper;

/// Legacy marker meaning "the search returned nothing".
pub const NO_COURSES_SENTINEL: &str = "No courses found.";
/// Legacy prefix marking an error entry in a title list.
pub const ERROR_PREFIX: &str = "Error";

/// Outcome of one course lookup for a competency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CourseLookup {
    /// Course titles in the order the catalog returned them.
    Found(Vec<String>),
    /// The search completed but yielded no titles.
    Empty,
    /// The search could not be completed.
    Failed(String),
}

impl CourseLookup {
    /// Wraps titles, collapsing an empty list into [`CourseLookup::Empty`].
    pub fn from_titles(titles: Vec<String>) -> Self {
        if titles.is_empty() {
            Self::Empty
        } else {
            Self::Found(titles)
        }
    }

    /// Interprets a title list from collaborators that still signal "none" and
    /// errors in-band with sentinel strings.
    pub fn from_sentinels(entries: Vec<String>) -> Self {
        if let Some(error) = entries.iter().find(|e| e.starts_with(ERROR_PREFIX)) {
            if entries.iter().all(|e| !is_valid_title(e)) {
                return Self::Failed(error.clone());
            }
        }
        Self::from_titles(entries.into_iter().filter(|e| is_valid_title(e)).collect())
    }

    /// Titles that are usable as recommendations.
    pub fn valid_titles(&self) -> Vec<&str> {
        match self {
            Self::Found(titles) => titles
                .iter()
                .map(String::as_str)
                .filter(|title| is_valid_title(title))
                .collect(),
            Self::Empty | Self::Failed(_) => Vec::new(),
        }
    }
}

fn is_valid_title(title: &str) -> bool {
    let trimmed = title.trim();
    !trimmed.is_empty() && trimmed != NO_COURSES_SENTINEL && !trimmed.starts_with(ERROR_PREFIX)
}

/// External capability that finds course titles for a competency.
///
/// Implementations never fail loudly: transport and parsing problems come back
/// as [`CourseLookup::Failed`].
pub trait CourseSource {
    /// Looks up at most `max_results` course titles for `competency`.
    fn lookup(&self, competency: &str, max_results: usize) -> CourseLookup;
}
