//! Artifact Descriptors - What Gets Published, In Display Order

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type ArtifactId = String;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Failed to read compile list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid compile list: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Artifact id must not be empty (source {0})")]
    EmptyId(String),

    #[error("Duplicate artifact id: {0}")]
    DuplicateId(String),

    #[error("Artifacts {first} and {second} publish to the same file {filename}")]
    DuplicateArtifactName {
        filename: String,
        first: String,
        second: String,
    },

    #[error("Source path {0} has no file name")]
    NoFileName(String),
}

/// Lifecycle status of a document.
///
/// Any value outside the known set, string or not, becomes `Unknown`
/// instead of failing the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Draft,
    Released,
    Deprecated,
    Unknown,
}

impl From<&str> for ArtifactStatus {
    fn from(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "released" => Self::Released,
            "deprecated" => Self::Deprecated,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for ArtifactStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl<'de> Deserialize<'de> for ArtifactStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = toml::Value::deserialize(deserializer)?;
        Ok(value.as_str().map_or(Self::Unknown, Self::from))
    }
}

impl Default for ArtifactStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub id: ArtifactId,
    #[serde(rename = "file")]
    pub source_path: PathBuf,
    #[serde(default)]
    pub status: ArtifactStatus,
}

impl ArtifactDescriptor {
    pub fn new(
        id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        status: ArtifactStatus,
    ) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
            status,
        }
    }

    /// Path of the compiled artifact: the source with a `.pdf` extension.
    pub fn artifact_path(&self) -> PathBuf {
        self.source_path.with_extension("pdf")
    }

    /// File name the artifact is published under.
    pub fn artifact_filename(&self) -> Result<String, DescriptorError> {
        self.artifact_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DescriptorError::NoFileName(self.source_path.display().to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CompileList {
    #[serde(default)]
    entries: Vec<ArtifactDescriptor>,
}

/// Ordered, validated collection of descriptors.
///
/// Iteration order is the declared order of the compile list and is the
/// order rows are emitted in.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    entries: Vec<ArtifactDescriptor>,
}

impl DescriptorSet {
    pub fn new(entries: Vec<ArtifactDescriptor>) -> Result<Self, DescriptorError> {
        Self::check(&entries)?;
        Ok(Self { entries })
    }

    fn check(entries: &[ArtifactDescriptor]) -> Result<(), DescriptorError> {
        let mut ids = HashSet::new();
        let mut filenames: Vec<(String, &str)> = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.id.trim().is_empty() {
                return Err(DescriptorError::EmptyId(entry.source_path.display().to_string()));
            }
            if !ids.insert(entry.id.as_str()) {
                return Err(DescriptorError::DuplicateId(entry.id.clone()));
            }
            let filename = entry.artifact_filename()?;
            if let Some((_, first)) = filenames.iter().find(|(f, _)| *f == filename) {
                return Err(DescriptorError::DuplicateArtifactName {
                    filename,
                    first: first.to_string(),
                    second: entry.id.clone(),
                });
            }
            filenames.push((filename, entry.id.as_str()));
        }
        Ok(())
    }

    pub fn from_toml(content: &str) -> Result<Self, DescriptorError> {
        let list: CompileList = toml::from_str(content)?;
        Self::new(list.entries)
    }

    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactDescriptor> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Option<&ArtifactDescriptor> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source files to compile, in declared order.
    pub fn source_files(&self) -> Vec<&Path> {
        self.entries.iter().map(|e| e.source_path.as_path()).collect()
    }
}
