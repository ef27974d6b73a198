//! Competency corpus loading.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AssistantError, Result};

/// Header names accepted for the competency name column.
const NAME_COLUMNS: &[&str] = &["competency", "name"];
/// Header name of the description column.
const DESCRIPTION_COLUMN: &str = "description";

/// One named skill with its textual description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetencyRecord {
    /// Competency name, trimmed.
    pub name: String,
    /// Free-text description, trimmed.
    pub description: String,
}

impl CompetencyRecord {
    /// Builds a record from raw fields.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Text submitted to the embedder: `"name. description"`.
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.name, self.description)
    }
}

/// Loads competencies from a delimited file on disk.
pub fn load_competencies(path: &Path, delimiter: u8) -> Result<Vec<CompetencyRecord>> {
    info!(path = %path.display(), "loading competency data");
    let file = File::open(path).map_err(|err| {
        AssistantError::data_load(format!(
            "competency data file not found at {}: {err}",
            path.display()
        ))
    })?;
    read_competencies(file, delimiter).map_err(|err| match err {
        AssistantError::DataLoad { message } => {
            AssistantError::data_load(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}

/// Parses competencies from any reader yielding delimited text with a header row.
///
/// Header names are compared after trimming and lowercasing. Rows with a blank
/// name or description are dropped.
pub fn read_competencies<R: Read>(reader: R, delimiter: u8) -> Result<Vec<CompetencyRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|err| AssistantError::data_load(format!("failed to read header row: {err}")))?
        .clone();
    let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let name_idx = normalized
        .iter()
        .position(|h| NAME_COLUMNS.contains(&h.as_str()))
        .ok_or_else(|| AssistantError::data_load("missing required column `competency`"))?;
    let description_idx = normalized
        .iter()
        .position(|h| h == DESCRIPTION_COLUMN)
        .ok_or_else(|| AssistantError::data_load("missing required column `description`"))?;

    let mut records = Vec::new();
    let mut total_rows = 0usize;
    for (row_no, row) in csv_reader.records().enumerate() {
        let row = row.map_err(|err| {
            AssistantError::data_load(format!("malformed row {}: {err}", row_no + 2))
        })?;
        total_rows += 1;
        let name = row.get(name_idx).map(str::trim).unwrap_or_default();
        let description = row.get(description_idx).map(str::trim).unwrap_or_default();
        if name.is_empty() || description.is_empty() {
            debug!(row = row_no + 2, "dropping competency row with missing fields");
            continue;
        }
        records.push(CompetencyRecord::new(name, description));
    }

    info!(
        rows = total_rows,
        kept = records.len(),
        "competency data loaded"
    );
    if records.is_empty() {
        return Err(AssistantError::data_load(
            "competency data contains no usable rows",
        ));
    }
    Ok(records)
}
