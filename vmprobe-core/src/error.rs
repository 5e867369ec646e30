use std::path::PathBuf;

/// Errors produced by the `vmprobe-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A request field failed validation at the system boundary.
    #[error("invalid request field '{field}': {reason}")]
    InvalidRequest { field: String, reason: String },

    /// The artifact manifest could not be read.
    #[error("cannot read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact manifest is not valid JSON or violates the schema.
    #[error("malformed manifest: {reason}")]
    ManifestParse { reason: String },
}
