//! Checksum Ledger - Published State Per Artifact
//!
//! Text format, one stanza per artifact:
//!
//! ```text
//! [STD-001]
//! checksum = "9e107d9d372bb6826bd81d3542a419d6"
//! last_modified = 2024-01-01T00:00:00Z
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::source::{FetchOutcome, PublishedSource};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Malformed ledger entry [{id}]: {message}")]
    MalformedEntry { id: String, message: String },

    #[error("Failed to write ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub checksum: String,
    pub last_modified: DateTime<Utc>,
}

/// Mapping from artifact id to its published state.
///
/// Insertion order is kept so the written document follows the order
/// artifacts were decided in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: IndexMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    /// Insert or replace; a replaced id keeps its original position.
    pub fn insert(&mut self, id: impl Into<String>, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(id.into(), entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn parse(content: &str) -> Result<Self, LedgerError> {
        let table: toml::Table = content.parse()?;
        let mut ledger = Self::new();

        for (id, value) in table {
            let malformed = |message: &str| LedgerError::MalformedEntry {
                id: id.clone(),
                message: message.to_string(),
            };
            let stanza = value.as_table().ok_or_else(|| malformed("not a table"))?;

            let checksum = stanza
                .get("checksum")
                .and_then(toml::Value::as_str)
                .ok_or_else(|| malformed("missing string `checksum`"))?
                .to_string();

            let raw = match stanza.get("last_modified") {
                Some(toml::Value::Datetime(dt)) => dt.to_string(),
                Some(toml::Value::String(s)) => s.clone(),
                _ => return Err(malformed("missing `last_modified`")),
            };
            let last_modified = DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| malformed(&format!("last_modified {raw}: {e}")))?
                .with_timezone(&Utc);

            ledger.insert(id.clone(), LedgerEntry {
                checksum,
                last_modified,
            });
        }

        Ok(ledger)
    }

    pub fn to_document(&self) -> String {
        let mut out = String::new();
        for (id, entry) in &self.entries {
            // Infallible for String.
            let _ = write!(
                out,
                "[{}]\nchecksum = {}\nlast_modified = {}\n\n",
                table_key(id),
                toml::Value::String(entry.checksum.clone()),
                entry.last_modified.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            );
        }
        out
    }
}

fn table_key(id: &str) -> String {
    let bare = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        id.to_string()
    } else {
        toml::Value::String(id.to_string()).to_string()
    }
}

/// Why the baseline looks the way it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum BaselineOrigin {
    Loaded,
    /// Nothing published yet: the expected first-run state.
    Absent,
    Unreachable(String),
    Malformed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Baseline {
    pub ledger: Ledger,
    pub origin: BaselineOrigin,
}

impl Baseline {
    pub fn empty(origin: BaselineOrigin) -> Self {
        Self {
            ledger: Ledger::new(),
            origin,
        }
    }
}

/// Retrieve the previously published ledger.
///
/// Every failure is folded into an empty baseline; the origin records
/// which failure it was.
pub fn fetch_baseline(source: &dyn PublishedSource, ledger_name: &str) -> Baseline {
    match source.fetch(ledger_name) {
        FetchOutcome::Found(bytes) => {
            let parsed = String::from_utf8(bytes)
                .map_err(|e| e.to_string())
                .and_then(|text| Ledger::parse(&text).map_err(|e| e.to_string()));
            match parsed {
                Ok(ledger) => {
                    tracing::info!(
                        entries = ledger.len(),
                        source = %source.describe(),
                        "baseline ledger loaded"
                    );
                    Baseline {
                        ledger,
                        origin: BaselineOrigin::Loaded,
                    }
                }
                Err(message) => {
                    tracing::warn!(%message, "baseline ledger is malformed, treating as absent");
                    Baseline::empty(BaselineOrigin::Malformed(message))
                }
            }
        }
        FetchOutcome::NotFound => {
            tracing::info!(source = %source.describe(), "no baseline ledger published yet");
            Baseline::empty(BaselineOrigin::Absent)
        }
        FetchOutcome::Unreachable(reason) => {
            tracing::warn!(%reason, "baseline ledger unreachable, treating as absent");
            Baseline::empty(BaselineOrigin::Unreachable(reason))
        }
    }
}

/// Replace `path` with `data` in one rename; readers never see half a file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<(), LedgerError> {
    write_atomic(path, ledger.to_document().as_bytes()).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), entries = ledger.len(), "ledger written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DirectorySource;
    use chrono::TimeZone;

    const DOC: &str = "[STD-001]\nchecksum = \"abc\"\nlast_modified = 2024-01-01T00:00:00Z\n\n\
                       [STD-002]\nchecksum = \"def\"\nlast_modified = 2024-03-05T12:30:45Z\n\n";

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn entry(checksum: &str, last_modified: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            checksum: checksum.to_string(),
            last_modified,
        }
    }

    #[test]
    fn test_parse_document() {
        let ledger = Ledger::parse(DOC).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get("STD-001").unwrap(), &entry("abc", ts(2024, 1, 1, 0, 0, 0)));
        assert_eq!(ledger.get("STD-002").unwrap().last_modified, ts(2024, 3, 5, 12, 30, 45));
    }

    #[test]
    fn test_document_format_exact() {
        let mut ledger = Ledger::new();
        ledger.insert("STD-001", entry("abc", ts(2024, 1, 1, 0, 0, 0)));
        ledger.insert("STD-002", entry("def", ts(2024, 3, 5, 12, 30, 45)));
        assert_eq!(ledger.to_document(), DOC);
    }

    #[test]
    fn test_written_document_parses_back() {
        let mut ledger = Ledger::new();
        ledger.insert("id with.dot", entry("0f", ts(2023, 7, 8, 9, 10, 11)));
        let parsed = Ledger::parse(&ledger.to_document()).unwrap();
        assert_eq!(parsed, ledger);
    }

    #[test]
    fn test_subsecond_timestamp_survives_rewrite() {
        let doc = "[A]\nchecksum = \"x\"\nlast_modified = 2024-01-01T00:00:00.250Z\n\n";
        let ledger = Ledger::parse(doc).unwrap();
        let expected = ts(2024, 1, 1, 0, 0, 0) + chrono::Duration::milliseconds(250);
        assert_eq!(ledger.get("A").unwrap().last_modified, expected);

        assert_eq!(ledger.to_document(), doc);
        assert_eq!(Ledger::parse(&ledger.to_document()).unwrap(), ledger);
    }

    #[test]
    fn test_nanosecond_timestamp_survives_rewrite() {
        let mut ledger = Ledger::new();
        let stamp = ts(2024, 6, 1, 8, 0, 0) + chrono::Duration::nanoseconds(123_456_789);
        ledger.insert("A", entry("x", stamp));
        let parsed = Ledger::parse(&ledger.to_document()).unwrap();
        assert_eq!(parsed.get("A").unwrap().last_modified, stamp);
    }

    #[test]
    fn test_parse_rejects_missing_checksum() {
        let err = Ledger::parse("[A]\nlast_modified = 2024-01-01T00:00:00Z\n").unwrap_err();
        assert!(matches!(err, LedgerError::MalformedEntry { id, .. } if id == "A"));
    }

    #[test]
    fn test_parse_rejects_local_datetime() {
        let doc = "[A]\nchecksum = \"x\"\nlast_modified = 2024-01-01T00:00:00\n";
        assert!(Ledger::parse(doc).is_err());
    }

    #[test]
    fn test_fetch_baseline_absent() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = fetch_baseline(&DirectorySource::new(dir.path()), "std_checksum.toml");
        assert_eq!(baseline.origin, BaselineOrigin::Absent);
        assert!(baseline.ledger.is_empty());
    }

    #[test]
    fn test_fetch_baseline_malformed_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("std_checksum.toml"), "[[[ nope").unwrap();
        let baseline = fetch_baseline(&DirectorySource::new(dir.path()), "std_checksum.toml");
        assert!(matches!(baseline.origin, BaselineOrigin::Malformed(_)));
        assert!(baseline.ledger.is_empty());
    }

    #[test]
    fn test_fetch_baseline_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("std_checksum.toml"), DOC).unwrap();
        let baseline = fetch_baseline(&DirectorySource::new(dir.path()), "std_checksum.toml");
        assert_eq!(baseline.origin, BaselineOrigin::Loaded);
        assert_eq!(baseline.ledger.len(), 2);
    }

    #[test]
    fn test_write_ledger_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("std_checksum.toml");
        std::fs::write(&path, "stale").unwrap();

        let ledger = Ledger::parse(DOC).unwrap();
        write_ledger(&path, &ledger).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DOC);
    }
}
