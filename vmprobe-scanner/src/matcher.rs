//! Manifest matcher.
//!
//! Compiles the manifest once at process start and resolves it against a
//! mounted guest tree. Patterns written with Windows syntax are reduced to
//! their last component anchored at `/`; `*` matches any run of characters
//! other than `/`.

use std::path::Path;

use regex::Regex;
use vmprobe_core::{Manifest, ManifestEntry, MatchedFile, WILDCARD};

use crate::inspector::GuestFilesystem;
use crate::ScanError;

/// Rewrites a manifest path into the guest's `/`-rooted syntax.
///
/// Backslashes are separators. A path that is not rooted at `/` keeps only
/// its last component: `c:/windows/system32/*.scr` becomes `/*.scr`.
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') {
        return unified;
    }
    match unified.rfind('/') {
        Some(idx) => format!("/{}", &unified[idx + 1..]),
        None => format!("/{unified}"),
    }
}

/// One manifest path after normalisation.
#[derive(Debug, Clone)]
pub struct PathPattern {
    normalized: String,
    /// Present only for wildcard patterns.
    regex: Option<Regex>,
}

impl PathPattern {
    /// Normalises `raw` and, when it contains `*`, compiles it to an
    /// anchored regular expression.
    ///
    /// # Errors
    /// Returns [`ScanError::ManifestLoadFailure`] if the expression cannot be
    /// compiled.
    pub fn compile(raw: &str) -> Result<Self, ScanError> {
        let normalized = normalize_path(raw);
        let regex = if normalized.contains(WILDCARD) {
            let body = normalized
                .split(WILDCARD)
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[^/]*");
            let regex = Regex::new(&format!("^{body}$"))
                .map_err(|e| ScanError::ManifestLoadFailure(format!("pattern '{raw}': {e}")))?;
            Some(regex)
        } else {
            None
        };
        Ok(Self { normalized, regex })
    }

    /// The `/`-rooted form of the pattern.
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.regex.is_some()
    }

    /// Deepest directory of the pattern that contains no wildcard.
    #[must_use]
    pub fn prefix_dir(&self) -> String {
        let mut fixed = Vec::new();
        for component in self.normalized.split('/').filter(|c| !c.is_empty()) {
            if component.contains(WILDCARD) {
                break;
            }
            fixed.push(component);
        }
        if !self.is_wildcard() {
            fixed.pop();
        }
        format!("/{}", fixed.join("/"))
    }

    /// Whether a wildcard sits above the last component, so candidates can
    /// live more than one level below [`PathPattern::prefix_dir`].
    #[must_use]
    pub fn spans_directories(&self) -> bool {
        self.normalized
            .rsplit_once('/')
            .is_some_and(|(parent, _)| parent.contains(WILDCARD))
    }

    /// Whether `path` satisfies the whole pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(path),
            None => path == self.normalized,
        }
    }
}

/// The manifest with every pattern pre-compiled. Immutable once built.
#[derive(Debug, Clone)]
pub struct ManifestMatcher {
    entries: Vec<(ManifestEntry, PathPattern)>,
}

impl ManifestMatcher {
    /// Compiles every entry of `manifest`.
    ///
    /// # Errors
    /// Returns [`ScanError::ManifestLoadFailure`] if a pattern cannot compile.
    pub fn new(manifest: &Manifest) -> Result<Self, ScanError> {
        let entries = manifest
            .files
            .iter()
            .map(|entry| Ok((entry.clone(), PathPattern::compile(&entry.path)?)))
            .collect::<Result<Vec<_>, ScanError>>()?;
        Ok(Self { entries })
    }

    /// Reads the manifest file and compiles it.
    ///
    /// # Errors
    /// Returns [`ScanError::ManifestLoadFailure`] if the file is missing,
    /// malformed, or holds an uncompilable pattern.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let manifest = Manifest::load(path).map_err(|e| ScanError::ManifestLoadFailure(e.to_string()))?;
        Self::new(&manifest)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves every entry against a mounted guest tree.
    ///
    /// Entries are processed in manifest order; matches of one wildcard
    /// entry are sorted. Paths that are not regular files (after following
    /// symlinks) are skipped.
    ///
    /// # Errors
    /// Propagates engine errors from listing, probing or reading files.
    pub async fn match_files<F>(&self, fs: &F) -> Result<Vec<MatchedFile>, ScanError>
    where
        F: GuestFilesystem + ?Sized,
    {
        let mut matched = Vec::new();
        for (entry, pattern) in &self.entries {
            for candidate in expand(fs, pattern).await? {
                if !fs.is_file(&candidate, true).await? {
                    continue;
                }
                let content = if entry.collect_content {
                    Some(fs.read_lines(&candidate).await?.join("\n"))
                } else {
                    None
                };
                tracing::debug!(path = %candidate, collected = content.is_some(), "manifest match");
                matched.push(MatchedFile { name: candidate, content });
            }
        }
        Ok(matched)
    }
}

/// Candidate paths for one pattern.
async fn expand<F>(fs: &F, pattern: &PathPattern) -> Result<Vec<String>, ScanError>
where
    F: GuestFilesystem + ?Sized,
{
    if !pattern.is_wildcard() {
        return Ok(vec![pattern.normalized().to_owned()]);
    }

    let dir = pattern.prefix_dir();
    if !fs.is_dir(&dir).await? {
        return Ok(Vec::new());
    }

    let listed = if pattern.spans_directories() { fs.find(&dir).await? } else { fs.list(&dir).await? };
    let mut found: Vec<String> = listed
        .into_iter()
        .map(|relative| join(&dir, &relative))
        .filter(|path| pattern.matches(path))
        .collect();
    found.sort();
    found.dedup();
    Ok(found)
}

fn join(dir: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if dir == "/" {
        format!("/{relative}")
    } else {
        format!("{dir}/{relative}")
    }
}
