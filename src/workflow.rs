//! Tick-driven session workflow.
//!
//! The host owns a [`SessionState`] and calls [`WorkflowController::step`] once per
//! refresh. Each call performs at most one blocking unit of work (retrieval, one
//! course lookup, or composition) and hands the state back, so a session can be
//! persisted between ticks and resumed by a different process.

use std::fmt::Write as _;

use tracing::{debug, info, warn};

use crate::composer::RecommendationComposer;
use crate::courses::CourseSource;
use crate::retrieval::{CompetencyMatch, CompetencySearch};
use crate::session::{ChatMessage, Phase, Role, SessionState};
use crate::settings::AssistantSettings;

/// Reply when retrieval returns no competency above the threshold.
pub const NO_MATCHES_REPLY: &str = "I couldn't find any relevant competencies based on your input. Could you provide more details or try different keywords?";
/// Reply when retrieval itself fails.
pub const RETRIEVAL_FAILED_REPLY: &str = "Sorry, an error occurred while searching for competencies.";

/// What the host asks the workflow to do on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The learner submitted a query.
    Input(String),
    /// Plain refresh: advance pending work, if any.
    Refresh,
}

/// Unit of work performed by one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Work {
    /// Nothing was pending.
    Idle,
    /// Input arrived while a query was still in flight and was dropped.
    Busy,
    /// A query was accepted and retrieval returned this many matches.
    Retrieval {
        /// Number of competencies found.
        matches: usize,
    },
    /// A query was accepted but retrieval failed.
    RetrievalFailed,
    /// One course lookup ran.
    CourseLookup {
        /// Position of the competency in the match list.
        index: usize,
        /// Competency that was looked up.
        competency: String,
    },
    /// The final recommendation was composed.
    Composition,
    /// An inconsistent session was reset to idle.
    Reset,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// Work performed.
    pub work: Work,
    /// Messages appended to the transcript during the tick.
    pub messages: Vec<ChatMessage>,
}

/// Drives a session through retrieval, course lookups and composition.
pub struct WorkflowController<'a> {
    search: &'a dyn CompetencySearch,
    courses: &'a dyn CourseSource,
    composer: &'a RecommendationComposer,
    top_n: usize,
    similarity_threshold: f32,
    max_courses: usize,
}

impl<'a> WorkflowController<'a> {
    /// Wires the collaborators together using the bounds from `settings`.
    pub fn new(
        search: &'a dyn CompetencySearch,
        courses: &'a dyn CourseSource,
        composer: &'a RecommendationComposer,
        settings: &AssistantSettings,
    ) -> Self {
        Self {
            search,
            courses,
            composer,
            top_n: settings.top_n(),
            similarity_threshold: settings.similarity_threshold(),
            max_courses: settings.max_courses(),
        }
    }

    /// Advances `state` by at most one unit of work.
    pub fn step(&self, mut state: SessionState, event: Event) -> (SessionState, TickOutput) {
        let before = state.messages.len();
        let work = self.advance(&mut state, event);
        let messages = state.messages[before..].to_vec();
        debug!(?work, appended = messages.len(), "workflow tick finished");
        (state, TickOutput { work, messages })
    }

    /// Appends the "searching" status line for the pending lookup, unless it is
    /// already the last message. Hosts may call this before [`Self::step`] to
    /// show progress while the lookup runs.
    pub fn announce(&self, state: &mut SessionState) -> Option<ChatMessage> {
        let Phase::AwaitingCourseLookup(index) = state.phase() else {
            return None;
        };
        let competency = state.competencies.get(index)?;
        let status = searching_message(&competency.name, index, state.total_search_count);
        let already_posted = state
            .last_message()
            .is_some_and(|last| last.role == Role::Assistant && last.content == status);
        if already_posted {
            return None;
        }
        Some(state.push_assistant(status))
    }

    fn advance(&self, state: &mut SessionState, event: Event) -> Work {
        if let Some(index) = state.current_index {
            if index > state.competencies.len() || state.total_search_count != state.competencies.len() {
                warn!(
                    index,
                    total = state.total_search_count,
                    competencies = state.competencies.len(),
                    "session cursor out of range; resetting"
                );
                state.reset_query();
                return Work::Reset;
            }
        }
        match (state.phase(), event) {
            (Phase::Idle, Event::Input(text)) => {
                let query = text.trim();
                if query.is_empty() {
                    return Work::Idle;
                }
                self.accept_query(state, query)
            }
            (Phase::Idle, Event::Refresh) => Work::Idle,
            (_, Event::Input(_)) => {
                debug!("query in flight; ignoring input");
                Work::Busy
            }
            (Phase::AwaitingCourseLookup(index), Event::Refresh) => self.lookup_courses(state, index),
            (Phase::ComposingRecommendation, Event::Refresh) => self.compose(state),
        }
    }

    fn accept_query(&self, state: &mut SessionState, query: &str) -> Work {
        state.messages.push(ChatMessage::user(query));
        state.reset_query();
        state.user_query = query.to_string();
        info!(query, "searching competencies");
        match self.search.search(query, self.top_n, self.similarity_threshold) {
            Ok(matches) if matches.is_empty() => {
                info!("no competency above threshold");
                state.final_message_added = true;
                state.push_assistant(NO_MATCHES_REPLY);
                Work::Retrieval { matches: 0 }
            }
            Ok(matches) => {
                info!(found = matches.len(), "competencies matched");
                state.push_assistant(competencies_message(&matches));
                state.total_search_count = matches.len();
                state.current_index = Some(0);
                state.competencies = matches;
                Work::Retrieval {
                    matches: state.total_search_count,
                }
            }
            Err(err) => {
                warn!(error = %err, "competency search failed");
                state.reset_query();
                state.final_message_added = true;
                state.push_assistant(RETRIEVAL_FAILED_REPLY);
                Work::RetrievalFailed
            }
        }
    }

    fn lookup_courses(&self, state: &mut SessionState, index: usize) -> Work {
        self.announce(state);
        let competency = state.competencies[index].name.clone();
        let result = self.courses.lookup(&competency, self.max_courses);
        debug!(competency = %competency, ?result, "course lookup stored");
        state.search_results.insert(competency.clone(), result);
        state.current_index = Some(index + 1);
        Work::CourseLookup { index, competency }
    }

    fn compose(&self, state: &mut SessionState) -> Work {
        info!(query = %state.user_query, "composing recommendation");
        let reply = self
            .composer
            .compose(&state.user_query, &state.competencies, &state.search_results);
        state.push_assistant(reply);
        state.final_message_added = true;
        state.current_index = None;
        Work::Composition
    }
}

/// Summary posted right after retrieval succeeds.
pub fn competencies_message(matches: &[CompetencyMatch]) -> String {
    let mut message =
        String::from("Based on your interest, I've identified these relevant competencies:\n\n");
    for (i, m) in matches.iter().enumerate() {
        let percent = (m.similarity_score * 100.0) as i32;
        let _ = writeln!(message, "**{}. {}** ({percent}% match)", i + 1, m.name);
        let _ = write!(message, "{}\n\n", m.description);
    }
    message.push_str(
        "I'm now searching for courses related to these competencies. This might take a moment...",
    );
    message
}

/// Status line for the lookup at `index` out of `total`.
pub fn searching_message(competency: &str, index: usize, total: usize) -> String {
    format!(
        "Searching for courses related to **{competency}** ({}/{total})....",
        index + 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use crate::composer::tests::RecordingGenerator;
    use crate::composer::{GENERATION_FAILED_REPLY, NO_COURSES_REPLY};
    use crate::courses::CourseLookup;
    use crate::error::{AssistantError, Result};

    struct StubSearch {
        result: Mutex<Option<Result<Vec<CompetencyMatch>>>>,
    }

    impl StubSearch {
        fn returning(matches: Vec<CompetencyMatch>) -> Self {
            Self {
                result: Mutex::new(Some(Ok(matches))),
            }
        }

        fn failing() -> Self {
            Self {
                result: Mutex::new(Some(Err(AssistantError::Retrieval("index offline".into())))),
            }
        }
    }

    impl CompetencySearch for StubSearch {
        fn search(&self, _query: &str, top_n: usize, _threshold: f32) -> Result<Vec<CompetencyMatch>> {
            let result = self.result.lock().unwrap().take().unwrap_or(Ok(Vec::new()));
            result.map(|mut matches| {
                matches.truncate(top_n);
                matches
            })
        }
    }

    #[derive(Default)]
    struct StubCourses {
        calls: Mutex<Vec<(String, usize)>>,
        empty: bool,
    }

    impl CourseSource for StubCourses {
        fn lookup(&self, competency: &str, max_results: usize) -> CourseLookup {
            self.calls
                .lock()
                .unwrap()
                .push((competency.to_string(), max_results));
            if self.empty {
                CourseLookup::Empty
            } else {
                CourseLookup::Found(vec![format!("Intro to {competency}")])
            }
        }
    }

    fn two_matches() -> Vec<CompetencyMatch> {
        vec![
            CompetencyMatch {
                name: "Data Analysis".into(),
                description: "Analyze datasets".into(),
                similarity_score: 0.75,
            },
            CompetencyMatch {
                name: "Data Visualization".into(),
                description: "Charts and dashboards".into(),
                similarity_score: 0.5,
            },
        ]
    }

    fn settings() -> AssistantSettings {
        AssistantSettings::default()
    }

    #[test]
    fn walks_a_query_to_completion_one_step_per_tick() {
        let search = StubSearch::returning(two_matches());
        let courses = StubCourses::default();
        let generator = RecordingGenerator::replying("## Courses for Data Analysis");
        let composer = RecommendationComposer::new(Some(Box::new(generator.clone())), 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let (state, out) = controller.step(SessionState::default(), Event::Input("  learn data  ".into()));
        assert_eq!(out.work, Work::Retrieval { matches: 2 });
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0], ChatMessage::user("learn data"));
        assert!(out.messages[1].content.contains("**1. Data Analysis** (75% match)\nAnalyze datasets"));
        assert!(out.messages[1].content.contains("**2. Data Visualization** (50% match)"));
        assert_eq!(state.phase(), Phase::AwaitingCourseLookup(0));
        assert_eq!(state.user_query, "learn data");

        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(
            out.work,
            Work::CourseLookup {
                index: 0,
                competency: "Data Analysis".into()
            }
        );
        assert_eq!(
            out.messages,
            vec![ChatMessage::assistant(
                "Searching for courses related to **Data Analysis** (1/2)...."
            )]
        );
        assert_eq!(state.phase(), Phase::AwaitingCourseLookup(1));

        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.messages[0].content, searching_message("Data Visualization", 1, 2));
        assert_eq!(state.phase(), Phase::ComposingRecommendation);
        assert_eq!(
            state.search_results.get("Data Visualization"),
            Some(&CourseLookup::Found(vec!["Intro to Data Visualization".into()]))
        );
        assert_eq!(generator.calls(), 0);

        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.work, Work::Composition);
        assert_eq!(
            out.messages,
            vec![ChatMessage::assistant("## Courses for Data Analysis")]
        );
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.final_message_added);
        assert_eq!(state.current_index, None);

        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.work, Work::Idle);
        assert!(out.messages.is_empty());
        assert_eq!(generator.calls(), 1);

        let calls = courses.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("Data Analysis".to_string(), settings.max_courses()),
                ("Data Visualization".to_string(), settings.max_courses()),
            ]
        );
        assert_eq!(state.messages.len(), 1 + 2 + 2 + 1);
    }

    #[test]
    fn generation_failure_still_completes_the_query() {
        let search = StubSearch::returning(two_matches());
        let courses = StubCourses::default();
        let generator = RecordingGenerator::default();
        let composer = RecommendationComposer::new(Some(Box::new(generator.clone())), 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let (state, _) = controller.step(SessionState::default(), Event::Input("learn data".into()));
        let (state, _) = controller.step(state, Event::Refresh);
        let (state, _) = controller.step(state, Event::Refresh);
        assert_eq!(state.phase(), Phase::ComposingRecommendation);

        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.work, Work::Composition);
        assert_eq!(out.messages, vec![ChatMessage::assistant(GENERATION_FAILED_REPLY)]);
        assert_eq!(state.messages.last(), Some(&ChatMessage::assistant(GENERATION_FAILED_REPLY)));
        assert!(state.final_message_added);
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(generator.calls(), 1);

        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.work, Work::Idle);
        assert!(out.messages.is_empty());
        assert_eq!(state.messages.len(), 1 + 2 + 2 + 1);
    }

    #[test]
    fn no_matches_finishes_immediately() {
        let search = StubSearch::returning(Vec::new());
        let courses = StubCourses::default();
        let composer = RecommendationComposer::new(None, 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let (state, out) = controller.step(SessionState::default(), Event::Input("juggling".into()));
        assert_eq!(out.work, Work::Retrieval { matches: 0 });
        assert_eq!(out.messages[1], ChatMessage::assistant(NO_MATCHES_REPLY));
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.final_message_added);

        let (_, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.work, Work::Idle);
        assert!(courses.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn retrieval_failure_resets_query_state() {
        let search = StubSearch::failing();
        let courses = StubCourses::default();
        let composer = RecommendationComposer::new(None, 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let (state, out) = controller.step(SessionState::default(), Event::Input("data".into()));
        assert_eq!(out.work, Work::RetrievalFailed);
        assert_eq!(out.messages[1], ChatMessage::assistant(RETRIEVAL_FAILED_REPLY));
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.competencies.is_empty());
        assert_eq!(state.current_index, None);
    }

    #[test]
    fn input_while_busy_is_rejected() {
        let search = StubSearch::returning(two_matches());
        let courses = StubCourses::default();
        let composer = RecommendationComposer::new(None, 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let (state, _) = controller.step(SessionState::default(), Event::Input("data".into()));
        let snapshot = state.clone();
        let (state, out) = controller.step(state, Event::Input("something else".into()));
        assert_eq!(out.work, Work::Busy);
        assert!(out.messages.is_empty());
        assert_eq!(state, snapshot);
    }

    #[test]
    fn blank_input_is_ignored() {
        let search = StubSearch::returning(two_matches());
        let courses = StubCourses::default();
        let composer = RecommendationComposer::new(None, 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let (state, out) = controller.step(SessionState::default(), Event::Input("   ".into()));
        assert_eq!(out.work, Work::Idle);
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn announce_is_idempotent() {
        let search = StubSearch::returning(two_matches());
        let courses = StubCourses {
            empty: true,
            ..StubCourses::default()
        };
        let composer = RecommendationComposer::new(None, 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let (mut state, _) = controller.step(SessionState::default(), Event::Input("data".into()));
        let first = controller.announce(&mut state);
        assert!(first.is_some());
        assert_eq!(controller.announce(&mut state), None);
        let posted = state.messages.len();

        let (state, out) = controller.step(state, Event::Refresh);
        assert!(out.messages.is_empty());
        assert_eq!(state.messages.len(), posted);

        let (state, _) = controller.step(state, Event::Refresh);
        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.messages, vec![ChatMessage::assistant(NO_COURSES_REPLY)]);
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn corrupted_cursor_resets_to_idle() {
        let search = StubSearch::returning(two_matches());
        let courses = StubCourses::default();
        let composer = RecommendationComposer::new(None, 0.3, 400);
        let settings = settings();
        let controller = WorkflowController::new(&search, &courses, &composer, &settings);

        let state = SessionState {
            user_query: "data".into(),
            competencies: two_matches(),
            current_index: Some(7),
            total_search_count: 9,
            ..SessionState::default()
        };
        let (state, out) = controller.step(state, Event::Refresh);
        assert_eq!(out.work, Work::Reset);
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.competencies.is_empty());
        assert!(courses.calls.lock().unwrap().is_empty());

        let (_, out) = controller.step(state, Event::Input("data".into()));
        assert_eq!(out.work, Work::Retrieval { matches: 2 });
    }
}
