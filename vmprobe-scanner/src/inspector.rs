//! Guest filesystem inspector.
//!
//! Attaches exported disks to an inspection engine, detects OS roots, mounts
//! each root's filesystems read-only (shallowest mountpoint first), runs the
//! manifest matcher over the mounted tree and unmounts again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vmprobe_core::{GuestRoot, OsIdentity};

use crate::matcher::ManifestMatcher;
use crate::ScanError;

/// Read-only view of a mounted guest tree, as used by the matcher.
#[async_trait]
pub trait GuestFilesystem: Send + Sync {
    /// Every path below `dir`, recursively, relative to `dir`.
    async fn find(&self, dir: &str) -> Result<Vec<String>, ScanError>;

    /// Names of the entries directly inside `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<String>, ScanError>;

    async fn is_dir(&self, path: &str) -> Result<bool, ScanError>;

    /// Whether `path` is a regular file, optionally following symlinks.
    async fn is_file(&self, path: &str, follow_symlinks: bool) -> Result<bool, ScanError>;

    /// File content split into lines.
    async fn read_lines(&self, path: &str) -> Result<Vec<String>, ScanError>;
}

/// An embedded filesystem-inspection engine bound to one scan.
#[async_trait]
pub trait InspectionEngine: GuestFilesystem {
    /// Adds an NBD export on a Unix socket as a read-only raw drive.
    async fn add_drive_ro(&self, socket: &Path) -> Result<(), ScanError>;

    /// Starts the engine's appliance with the added drives.
    async fn launch(&self) -> Result<(), ScanError>;

    /// Root devices of every detected OS.
    async fn inspect_os(&self) -> Result<Vec<String>, ScanError>;

    async fn filesystems(&self, root: &str) -> Result<Vec<String>, ScanError>;

    /// Mountpoint to device map of a root.
    async fn mountpoints(&self, root: &str) -> Result<BTreeMap<String, String>, ScanError>;

    async fn identity(&self, root: &str) -> Result<OsIdentity, ScanError>;

    async fn mount_ro(&self, device: &str, mountpoint: &str) -> Result<(), ScanError>;

    async fn umount_all(&self) -> Result<(), ScanError>;

    /// Detaches every drive and stops the engine.
    async fn shutdown(&self) -> Result<(), ScanError>;
}

/// Creates a fresh engine per scan.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// # Errors
    /// Returns [`ScanError::InspectionFailure`] if the engine cannot start.
    async fn open(&self) -> Result<Box<dyn InspectionEngine>, ScanError>;
}

/// Orders mountpoints so that no mount shadows a shallower one:
/// by path depth, then by length, then lexically.
#[must_use]
pub fn mount_order(mountpoints: &BTreeMap<String, String>) -> Vec<(&str, &str)> {
    let mut ordered: Vec<(&str, &str)> = mountpoints
        .iter()
        .map(|(mp, dev)| (mp.as_str(), dev.as_str()))
        .collect();
    ordered.sort_by_key(|(mp, _)| (mp.split('/').filter(|c| !c.is_empty()).count(), mp.len(), *mp));
    ordered
}

/// Drives one engine through attach, inspection and teardown.
pub struct GuestInspector {
    engine: Box<dyn InspectionEngine>,
    open: bool,
    mounted: bool,
}

impl std::fmt::Debug for GuestInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInspector")
            .field("open", &self.open)
            .field("mounted", &self.mounted)
            .finish_non_exhaustive()
    }
}

impl GuestInspector {
    #[must_use]
    pub fn new(engine: Box<dyn InspectionEngine>) -> Self {
        Self { engine, open: true, mounted: false }
    }

    /// Whether guest filesystems are currently mounted.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Attaches every export and inspects each detected OS root.
    ///
    /// # Errors
    /// Returns [`ScanError::NoOperatingSystemDetected`] when no root is
    /// found, [`ScanError::MountFailure`] when a mountpoint cannot be
    /// mounted, and propagates engine and matcher errors. Partial results
    /// are discarded.
    pub async fn attach_and_inspect(
        &mut self,
        sockets: &[PathBuf],
        matcher: &ManifestMatcher,
    ) -> Result<Vec<GuestRoot>, ScanError> {
        let roots = self.attach(sockets).await?;
        self.match_roots(roots, matcher).await
    }

    /// Attaches every export read-only, starts the engine and returns the
    /// detected OS roots. Nothing is mounted yet.
    ///
    /// # Errors
    /// Returns [`ScanError::NoOperatingSystemDetected`] when no root is found
    /// and propagates engine errors.
    pub async fn attach(&mut self, sockets: &[PathBuf]) -> Result<Vec<String>, ScanError> {
        for socket in sockets {
            tracing::debug!(socket = %socket.display(), "attaching export read-only");
            self.engine.add_drive_ro(socket).await?;
        }
        self.engine.launch().await?;

        let roots = self.engine.inspect_os().await?;
        if roots.is_empty() {
            return Err(ScanError::NoOperatingSystemDetected);
        }
        tracing::info!(count = roots.len(), "operating systems detected");
        Ok(roots)
    }

    /// Mounts each root in turn, runs the matcher over it and unmounts.
    ///
    /// # Errors
    /// Returns [`ScanError::MountFailure`] when a mountpoint cannot be
    /// mounted and propagates engine and matcher errors.
    pub async fn match_roots(
        &mut self,
        roots: Vec<String>,
        matcher: &ManifestMatcher,
    ) -> Result<Vec<GuestRoot>, ScanError> {
        let mut results = Vec::with_capacity(roots.len());
        for root in roots {
            results.push(self.inspect_root(root, matcher).await?);
        }
        Ok(results)
    }

    async fn inspect_root(&mut self, root: String, matcher: &ManifestMatcher) -> Result<GuestRoot, ScanError> {
        let filesystems = self.engine.filesystems(&root).await?;
        let mountpoints = self.engine.mountpoints(&root).await?;
        let identity = self.engine.identity(&root).await?;
        tracing::info!(root = %root, name = %identity.name, distro = %identity.distro, "inspecting guest root");

        for (mountpoint, device) in mount_order(&mountpoints) {
            self.mounted = true;
            self.engine
                .mount_ro(device, mountpoint)
                .await
                .map_err(|e| ScanError::MountFailure {
                    device: device.to_owned(),
                    mountpoint: mountpoint.to_owned(),
                    reason: e.to_string(),
                })?;
            tracing::debug!(device, mountpoint, "mounted read-only");
        }

        let files = matcher.match_files(self.engine.as_ref()).await?;
        tracing::info!(root = %root, matched = files.len(), "manifest matched");

        self.engine.umount_all().await?;
        self.mounted = false;

        let mut guest = GuestRoot::new(root, filesystems, mountpoints, identity);
        guest.files = files;
        Ok(guest)
    }

    /// Unmounts anything still mounted and stops the engine. Never fails;
    /// problems are logged.
    pub async fn teardown(&mut self) {
        if self.mounted {
            match self.engine.umount_all().await {
                Ok(()) => self.mounted = false,
                Err(e) => tracing::warn!(error = %e, "umount-all failed during teardown"),
            }
        }
        if self.open {
            self.open = false;
            if let Err(e) = self.engine.shutdown().await {
                tracing::warn!(error = %e, "inspection engine shutdown failed");
            }
        }
    }
}
