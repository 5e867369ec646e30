//! Disk-export-and-inspection pipeline of the vmprobe inventory probe.
//!
//! A scan logs in to the hypervisor, resolves the VM, takes a quiesced
//! snapshot, exports every disk read-only through `nbdkit`, inspects the
//! guest filesystems, matches the artifact manifest, and then unwinds all of
//! it in a fixed order regardless of how the forward path ended.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod guestfish;
pub mod hypervisor;
pub mod inspector;
pub mod matcher;
pub mod session;
pub mod snapshot;

pub use config::{ConfigError, ExportConfig, GeneralConfig, InspectorConfig, ProbeConfig};
pub use coordinator::{load_manifest, ScanCoordinator, ScanState, SharedManifest};
pub use error::{ErrorKind, ScanError};
pub use export::{ExportEndpoint, ExportOrchestrator, ExportSource};
pub use guestfish::{GuestfishEngine, GuestfishLauncher};
pub use hypervisor::{HypervisorConnector, HypervisorSession, SnapshotSpec};
pub use inspector::{EngineLauncher, GuestFilesystem, GuestInspector, InspectionEngine};
pub use matcher::{normalize_path, ManifestMatcher, PathPattern};
pub use session::{Session, VmHandle};
pub use snapshot::{Snapshot, SnapshotController};
