//! Turns matched competencies and course lookups into the final recommendation.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tracing::{info, warn};

use crate::courses::CourseLookup;
use crate::error::{AssistantError, Result};
use crate::llm::{LlmProvider, ProviderRequest};
use crate::retrieval::CompetencyMatch;

/// Reply when retrieval produced nothing to recommend from.
pub const NO_COMPETENCIES_REPLY: &str = "I couldn't find any competencies or courses this time.";
/// Reply when competencies matched but no lookup returned a usable title.
pub const NO_COURSES_REPLY: &str = "I found some relevant competencies, but couldn't find specific courses for them at this time. The course search might have failed or returned no results.";
/// Reply when no text generator is configured.
pub const GENERATOR_MISSING_REPLY: &str =
    "LLM Agent is not initialized. Cannot generate recommendations.";
/// Reply when the generator fails.
pub const GENERATION_FAILED_REPLY: &str =
    "Sorry, I encountered an error while trying to generate the course recommendations.";

/// Builds the user-facing recommendation message.
pub struct RecommendationComposer {
    generator: Option<Box<dyn LlmProvider>>,
    temperature: f32,
    max_tokens: usize,
}

impl RecommendationComposer {
    /// Composer backed by `generator`; `None` means generation is unavailable.
    pub fn new(generator: Option<Box<dyn LlmProvider>>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            generator,
            temperature,
            max_tokens,
        }
    }

    /// Whether a text generator is configured.
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Produces the final Markdown message. Never fails: every problem maps to
    /// one of the fixed replies.
    pub fn compose(
        &self,
        query: &str,
        matches: &[CompetencyMatch],
        results: &BTreeMap<String, CourseLookup>,
    ) -> String {
        if matches.is_empty() {
            return NO_COMPETENCIES_REPLY.to_string();
        }
        let courses = courses_by_competency(matches, results);
        if courses.is_empty() {
            info!("no usable course titles; skipping generation");
            return NO_COURSES_REPLY.to_string();
        }
        let Some(generator) = self.generator.as_deref() else {
            warn!("recommendation requested without a text generator");
            return GENERATOR_MISSING_REPLY.to_string();
        };
        let prompt = build_prompt(query, matches, &courses);
        match self.generate(generator, &prompt) {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "recommendation generation failed");
                GENERATION_FAILED_REPLY.to_string()
            }
        }
    }

    fn generate(&self, generator: &dyn LlmProvider, prompt: &str) -> Result<String> {
        let request = ProviderRequest {
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let answer = generator
            .answer(&request)
            .map_err(|err| AssistantError::Composition(format!("{err:#}")))?;
        if answer.trim().is_empty() {
            return Err(AssistantError::Composition(
                "generator returned an empty answer".into(),
            ));
        }
        Ok(answer)
    }
}

/// Valid titles per competency, in match order, skipping competencies without any.
fn courses_by_competency<'a>(
    matches: &'a [CompetencyMatch],
    results: &'a BTreeMap<String, CourseLookup>,
) -> Vec<(&'a str, Vec<&'a str>)> {
    matches
        .iter()
        .filter_map(|m| {
            let titles = results.get(&m.name)?.valid_titles();
            (!titles.is_empty()).then_some((m.name.as_str(), titles))
        })
        .collect()
}

fn build_prompt(query: &str, matches: &[CompetencyMatch], courses: &[(&str, Vec<&str>)]) -> String {
    let mut data = String::new();
    let _ = writeln!(data, "User Query: {query}");
    data.push_str("\nRelevant Competencies:\n");
    for (i, m) in matches.iter().enumerate() {
        let _ = writeln!(data, "- Competency {}: {}", i + 1, m.name);
        let _ = writeln!(data, "  Description: {}", m.description);
    }
    data.push_str("\nSearch Results (Competency -> List of Course Titles):\n");
    for (name, titles) in courses {
        let _ = writeln!(data, "- {name}:");
        for title in titles {
            let _ = writeln!(data, "  - {title}");
        }
    }

    let mut prompt = String::new();
    prompt.push_str(
        "Write a course recommendation message for a learner, using their original interest, \
the competencies that matched it, and the course titles found for each competency.\n\n",
    );
    let _ = writeln!(prompt, "The learner's original interest was: \"{query}\"\n");
    prompt.push_str(
        "Data (competencies without any course found are left out of the search results):\n\n",
    );
    prompt.push_str(&data);
    prompt.push_str(
        "\nDrop any course title that is not clearly related to its competency or to the \
learner's interest.\n\n",
    );
    prompt.push_str("Formatting rules:\n");
    prompt.push_str(
        "- Open with a short welcome such as \"Here are some course recommendations based on your interests:\".\n",
    );
    prompt.push_str(
        "- Give each competency from the search results its own heading, e.g. \"## Courses for <Competency Name>\".\n",
    );
    prompt.push_str("- List only relevant course titles under it, each in bold (**Course Title**).\n");
    let _ = writeln!(
        prompt,
        "- Under each title add one italic sentence tying the competency to the interest \"{query}\"."
    );
    prompt.push_str("- Only mention competencies and courses present in the data above.\n");
    prompt.push_str(
        "- Finish by asking whether the learner wants to dig into one of these competencies or search for something else.\n",
    );
    prompt.push_str(
        "\nIf no course survives the filtering, reply exactly: \"I found some competencies related to your interest, \
but couldn't find specific courses that are directly relevant at this time. Would you like to try a different \
search with more specific keywords?\"\n",
    );
    prompt
}
