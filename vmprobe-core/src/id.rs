use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Stable identifier of a target virtual machine (the hypervisor's
/// `config.uuid`).
///
/// Every per-scan filesystem artifact is namespaced by this value, so it is
/// validated to be usable as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmId(String);

impl VmId {
    /// Creates a `VmId`, rejecting values that cannot name a directory.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidRequest`] if the value is empty, is `.` or
    /// `..`, or contains a path separator or NUL byte.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidRequest {
                field: "vm_uuid".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\', '\0']) {
            return Err(CoreError::InvalidRequest {
                field: "vm_uuid".to_owned(),
                reason: format!("'{trimmed}' cannot be used as a path component"),
            });
        }
        if trimmed.contains(char::is_whitespace) {
            return Err(CoreError::InvalidRequest {
                field: "vm_uuid".to_owned(),
                reason: format!("'{trimmed}' contains whitespace"),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VmId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VmId> for String {
    fn from(id: VmId) -> Self {
        id.0
    }
}

/// Unique identifier for one scan run, used to correlate log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ScanId(pub Uuid);

impl ScanId {
    /// Creates a new random `ScanId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hypervisor managed object reference (e.g. `vm-42`, `snapshot-7`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoRef(pub String);

impl MoRef {
    /// Creates a `MoRef` from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_id_trims_whitespace() {
        let id = match VmId::new("  4210b2c3-aaaa  ") {
            Ok(id) => id,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(id.as_str(), "4210b2c3-aaaa");
    }

    #[test]
    fn vm_id_rejects_path_like_values() {
        for bad in ["", "   ", ".", "..", "a/b", "..\\x", "nul\0byte", "4210 b2c3", "a\tb"] {
            assert!(VmId::new(bad).is_err(), "'{bad}' must be rejected");
        }
    }

    #[test]
    fn vm_id_deserialization_validates() {
        let ok: Result<VmId, _> = serde_json::from_str("\"42\"");
        assert!(ok.is_ok());
        let bad: Result<VmId, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err(), "deserialization must run VmId validation");
    }

    #[test]
    fn scan_ids_are_unique() {
        assert_ne!(ScanId::new(), ScanId::new());
    }

    proptest::proptest! {
        #[test]
        fn proptest_accepted_ids_are_single_path_components(raw in "\\PC{0,40}") {
            if let Ok(id) = VmId::new(raw.as_str()) {
                let path = std::path::Path::new("/work").join(id.as_str());
                proptest::prop_assert_eq!(path.parent(), Some(std::path::Path::new("/work")));
                proptest::prop_assert!(path.file_name().is_some());
                proptest::prop_assert!(!id.as_str().contains(char::is_whitespace));
            }
        }

        #[test]
        fn proptest_ids_with_separators_are_rejected(
            head in "[a-f0-9-]{0,12}",
            sep in "[/\\\\]",
            tail in "[a-f0-9-]{0,12}",
        ) {
            let raw = format!("{head}{sep}{tail}");
            proptest::prop_assert!(VmId::new(raw).is_err());
        }
    }
}
