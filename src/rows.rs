//! Row Emission - Download Table Content
//!
//! Rows are produced in descriptor order and spliced between two marker
//! lines of an otherwise untouched document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::descriptors::ArtifactStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpliceError {
    #[error("Start marker {0:?} not found")]
    MissingStart(String),

    #[error("End marker {0:?} not found after start marker")]
    MissingEnd(String),
}

pub fn status_label(status: ArtifactStatus) -> &'static str {
    match status {
        ArtifactStatus::Draft => "📝 Draft",
        ArtifactStatus::Released => "📃 Released",
        ArtifactStatus::Deprecated => "🚫 Deprecated",
        ArtifactStatus::Unknown => "❓ Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRecord {
    pub id: String,
    pub status_label: String,
    pub modified_time: DateTime<Utc>,
    pub checksum: String,
    pub artifact_filename: String,
}

impl RowRecord {
    pub fn new(
        id: &str,
        status: ArtifactStatus,
        modified_time: DateTime<Utc>,
        checksum: &str,
        artifact_filename: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            status_label: status_label(status).to_string(),
            modified_time,
            checksum: checksum.to_string(),
            artifact_filename: artifact_filename.to_string(),
        }
    }

    pub fn to_table_row(&self) -> String {
        format!(
            "<tr><td>{}</td><td>{}</td><td>{} (UTC)</td>\
             <td><resource src=\"{}\">Download PDF</resource><br/>\
             MD5 Checksum: <code>{}</code></td></tr>",
            escape(&self.id),
            self.status_label,
            self.modified_time.format("%Y-%m-%d %H:%M:%S"),
            escape(&self.artifact_filename),
            escape(&self.checksum),
        )
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace the lines strictly between the first line containing
/// `start_marker` and the next line containing `end_marker`.
///
/// Both marker lines are kept, so the same document can be spliced again.
pub fn splice_between_markers(
    document: &str,
    start_marker: &str,
    end_marker: &str,
    replacement: &[String],
) -> Result<String, SpliceError> {
    let lines: Vec<&str> = document.split_inclusive('\n').collect();

    let start = lines
        .iter()
        .position(|l| l.contains(start_marker))
        .ok_or_else(|| SpliceError::MissingStart(start_marker.to_string()))?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.contains(end_marker))
        .map(|offset| start + 1 + offset)
        .ok_or_else(|| SpliceError::MissingEnd(end_marker.to_string()))?;

    let mut out = String::with_capacity(document.len());
    for line in &lines[..=start] {
        out.push_str(line);
    }
    for row in replacement {
        out.push_str(row);
        out.push('\n');
    }
    for line in &lines[end..] {
        out.push_str(line);
    }
    Ok(out)
}
