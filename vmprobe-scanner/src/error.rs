//! Error types for the scanner crate.

use std::path::PathBuf;

use serde::Serialize;
use vmprobe_core::VmId;

/// Errors that end a scan.
///
/// Every variant is fatal for the scan that raised it; none is fatal for the
/// process. Use [`ScanError::kind`] for the stable, caller-facing category.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ScanError {
    /// The management plane rejected the login.
    #[error("authentication to {host} failed: {reason}")]
    AuthenticationFailure { host: String, reason: String },

    /// No VM carries the requested identifier.
    #[error("no virtual machine with UUID '{0}'")]
    VmNotFound(VmId),

    /// More than one VM carries the requested identifier.
    #[error("UUID '{vm_id}' matches {count} virtual machines")]
    AmbiguousVm { vm_id: VmId, count: usize },

    /// The protective snapshot could not be created.
    #[error("snapshot failed for VM {vm_id}: {reason}")]
    SnapshotFailure { vm_id: VmId, reason: String },

    /// An export worker never created its socket.
    #[error("export socket {} for disk {disk_id} not ready after {attempts} checks", socket.display())]
    ExportTimeout { disk_id: String, socket: PathBuf, attempts: u32 },

    /// An export worker process could not be started.
    #[error("cannot launch export worker for disk {disk_id}: {reason}")]
    ExportLaunchFailure { disk_id: String, reason: String },

    /// Inspection found no operating system on the attached disks.
    #[error("inspect_os: no operating systems found")]
    NoOperatingSystemDetected,

    /// A guest filesystem could not be mounted read-only.
    #[error("mounting {device} on {mountpoint} failed: {reason}")]
    MountFailure { device: String, mountpoint: String, reason: String },

    /// The artifact manifest was missing or malformed at startup.
    #[error("manifest unavailable: {0}")]
    ManifestLoadFailure(String),

    /// The inspection engine failed outside of mounting.
    #[error("inspection engine error: {0}")]
    InspectionFailure(String),

    /// Any other management-plane failure.
    #[error("hypervisor API error: {0}")]
    HypervisorFailure(String),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stable category of a [`ScanError`], reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[non_exhaustive]
pub enum ErrorKind {
    AuthenticationFailure,
    VmNotFound,
    AmbiguousVm,
    SnapshotFailure,
    ExportTimeout,
    ExportLaunchFailure,
    NoOperatingSystemDetected,
    MountFailure,
    ManifestLoadFailure,
    InspectionFailure,
    HypervisorFailure,
    Io,
}

impl ScanError {
    /// Returns the caller-facing category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationFailure { .. } => ErrorKind::AuthenticationFailure,
            Self::VmNotFound(_) => ErrorKind::VmNotFound,
            Self::AmbiguousVm { .. } => ErrorKind::AmbiguousVm,
            Self::SnapshotFailure { .. } => ErrorKind::SnapshotFailure,
            Self::ExportTimeout { .. } => ErrorKind::ExportTimeout,
            Self::ExportLaunchFailure { .. } => ErrorKind::ExportLaunchFailure,
            Self::NoOperatingSystemDetected => ErrorKind::NoOperatingSystemDetected,
            Self::MountFailure { .. } => ErrorKind::MountFailure,
            Self::ManifestLoadFailure(_) => ErrorKind::ManifestLoadFailure,
            Self::InspectionFailure(_) => ErrorKind::InspectionFailure,
            Self::HypervisorFailure(_) => ErrorKind::HypervisorFailure,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}
