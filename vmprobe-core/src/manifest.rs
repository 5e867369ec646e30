//! Declarative artifact manifest.
//!
//! The manifest is a JSON document loaded once at process start:
//!
//! ```json
//! { "files": [ { "path": "/etc/*.conf", "collect_content": false } ] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Character that marks a manifest path as a pattern.
pub const WILDCARD: char = '*';

/// One artifact-of-interest descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    /// Literal path or `*` pattern, possibly written with Windows syntax.
    pub path: String,
    /// Whether the file's text content is captured.
    #[serde(default)]
    pub collect_content: bool,
}

impl ManifestEntry {
    /// Creates an entry.
    pub fn new(path: impl Into<String>, collect_content: bool) -> Self {
        Self { path: path.into(), collect_content }
    }

    /// Returns `true` if the path contains the wildcard character.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.path.contains(WILDCARD)
    }
}

/// The full list of manifest entries, immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parses a manifest from a JSON string.
    ///
    /// # Errors
    /// Returns [`CoreError::ManifestParse`] on malformed JSON, unknown
    /// fields, or an entry with an empty path.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let manifest: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::ManifestParse { reason: e.to_string() })?;
        if let Some(idx) = manifest.files.iter().position(|f| f.path.trim().is_empty()) {
            return Err(CoreError::ManifestParse {
                reason: format!("files[{idx}].path must not be empty"),
            });
        }
        Ok(manifest)
    }

    /// Reads and parses a manifest file.
    ///
    /// # Errors
    /// Returns [`CoreError::ManifestRead`] if the file cannot be read, or
    /// [`CoreError::ManifestParse`] if its content is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| CoreError::ManifestRead { path: path.to_owned(), source })?;
        Self::from_json(&content)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the manifest has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
