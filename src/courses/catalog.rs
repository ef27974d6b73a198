//! Course catalog scraper.
//!
//! Fetches the catalog's search results page for a competency and pulls course
//! titles out of the HTML with an ordered list of CSS selectors. Catalog markup
//! changes without notice, so the selector list runs from the most specific to
//! generic fallbacks and the first selector producing any title wins.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, ACCEPT, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::{CourseLookup, CourseSource};
use crate::embedder::{retry_backoff, should_retry};

const CLIENT_USER_AGENT: &str = concat!("learnpath/", env!("CARGO_PKG_VERSION"));

/// Selectors tried in order against the search results page.
pub const TITLE_SELECTORS: &[&str] = &[
    r#"span[data-qa="txt-name"]"#,
    ".txt-name",
    ".card-content span",
    ".search-result-card span",
    r#"div[id="search-courses-page"] span"#,
    ".course-card .title",
    ".course-title",
    "h3.course-name",
    ".course-list .item-title",
    r#"a[href*="/course/"] .title"#,
    ".card h3",
    "h3",
    ".card span",
];

/// Page chrome that some fallback selectors pick up.
const IGNORED_TITLES: &[&str] = &["coniverse", "results", "filters", "search", "course"];
const MIN_TITLE_CHARS: usize = 6;

/// Scrapes course titles from a catalog search page.
pub struct CatalogScraper {
    client: Client,
    search_url: Url,
    max_retries: usize,
}

impl CatalogScraper {
    /// Builds a scraper against `search_url` (query parameters are appended).
    pub fn new(search_url: &str, timeout: Duration, max_retries: usize) -> Result<Self> {
        let search_url = Url::parse(search_url)
            .with_context(|| format!("invalid course search URL {search_url}"))?;
        anyhow::ensure!(
            matches!(search_url.scheme(), "http" | "https"),
            "course search URL must be http(s)"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build course search HTTP client")?;
        Ok(Self {
            client,
            search_url,
            max_retries: max_retries.max(1),
        })
    }

    /// Search page URL for `competency`.
    pub fn search_url_for(&self, competency: &str) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("search", competency)
            .append_pair("ordering", "relevance");
        url
    }

    fn fetch(&self, url: &Url) -> Result<String> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url.as_str()).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().context("failed to read course search page");
                    }
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "retrying course search");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("course search returned {status}");
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "retrying course search");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err).context("course search request failed");
                }
            }
        }
    }
}

impl CourseSource for CatalogScraper {
    fn lookup(&self, competency: &str, max_results: usize) -> CourseLookup {
        let url = self.search_url_for(competency);
        info!(competency, %url, "searching course catalog");
        match self.fetch(&url) {
            Ok(body) => {
                let titles = extract_course_titles(&body, max_results);
                info!(competency, found = titles.len(), "course search finished");
                CourseLookup::from_titles(titles)
            }
            Err(err) => {
                warn!(competency, error = %format!("{err:#}"), "course search failed");
                CourseLookup::Failed(format!("Error retrieving courses: {err:#}"))
            }
        }
    }
}

/// Extracts up to `max_results` distinct course titles from a results page.
pub fn extract_course_titles(html: &str, max_results: usize) -> Vec<String> {
    if max_results == 0 {
        return Vec::new();
    }
    let document = Html::parse_document(html);
    for raw in TITLE_SELECTORS {
        let selector = match Selector::parse(raw) {
            Ok(selector) => selector,
            Err(err) => {
                warn!(selector = raw, error = %err, "skipping invalid selector");
                continue;
            }
        };
        let mut titles: Vec<String> = Vec::new();
        for element in document.select(&selector) {
            let title = element_text(element);
            if is_course_title(&title) && !titles.contains(&title) {
                titles.push(title);
            }
        }
        debug!(selector = raw, found = titles.len(), "tried title selector");
        if !titles.is_empty() {
            titles.truncate(max_results);
            return titles;
        }
    }
    Vec::new()
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_course_title(title: &str) -> bool {
    title.chars().count() >= MIN_TITLE_CHARS
        && !IGNORED_TITLES.contains(&title.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prefers_most_specific_selector() {
        let html = r#"
        <html><body>
          <h3>Popular this week</h3>
          <div class="card"><span data-qa="txt-name">SQL for Data Analysis</span></div>
          <div class="card"><span data-qa="txt-name">  Statistics
             Fundamentals </span></div>
        </body></html>
        "#;
        assert_eq!(
            extract_course_titles(html, 5),
            vec!["SQL for Data Analysis", "Statistics Fundamentals"]
        );
    }

    #[test]
    fn falls_back_to_generic_headings() {
        let html = r#"
        <body>
          <h3>Search</h3>
          <h3>Storytelling with Data</h3>
          <h3>Short</h3>
          <h3>Storytelling with Data</h3>
          <h3>Presenting Insights</h3>
        </body>
        "#;
        assert_eq!(
            extract_course_titles(html, 5),
            vec!["Storytelling with Data", "Presenting Insights"]
        );
    }

    #[test]
    fn truncates_to_max_results() {
        let mut html = String::from("<body>");
        for i in 0..10 {
            html.push_str(&format!(r#"<p class="course-title">Course number {i}</p>"#));
        }
        html.push_str("</body>");
        let titles = extract_course_titles(&html, 3);
        assert_eq!(titles.len(), 3);
        assert_eq!(titles[0], "Course number 0");
    }

    #[test]
    fn page_without_titles_yields_nothing() {
        let html = "<body><p>Nothing to see</p><span>Results</span></body>";
        assert!(extract_course_titles(html, 5).is_empty());
    }

    #[test]
    fn builds_encoded_search_url() {
        let scraper = CatalogScraper::new(
            "https://catalog.example/search/learning/courses",
            Duration::from_secs(1),
            1,
        )
        .unwrap();
        assert_eq!(
            scraper.search_url_for("Data & Analysis").as_str(),
            "https://catalog.example/search/learning/courses?search=Data+%26+Analysis&ordering=relevance"
        );
    }

    #[test]
    fn unreachable_catalog_reports_failure() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let scraper =
            CatalogScraper::new("http://127.0.0.1:9/search", Duration::from_secs(2), 1).unwrap();
        match scraper.lookup("Data Analysis", 3) {
            CourseLookup::Failed(reason) => assert!(reason.starts_with("Error")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
