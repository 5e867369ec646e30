//! Scan coordinator.
//!
//! Sequences one scan along a single forward path
//! (`Init → Connected → VmResolved → Snapshotted → DisksExported → Inspected
//! → Matched → Done`) and always runs teardown afterwards, whatever state the
//! forward path reached.
//!
//! # Cancel Safety
//! [`ScanCoordinator::scan`] is not cancel safe: dropping it mid-flight skips
//! snapshot removal. Use [`ScanCoordinator::spawn`] when the caller may go
//! away; the spawned task runs to completion on its own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;
use vmprobe_core::{HardwareDescriptor, Inventory, ScanId, ScanRequest};

use crate::config::ProbeConfig;
use crate::export::{ExportOrchestrator, ExportSource};
use crate::hypervisor::HypervisorConnector;
use crate::inspector::{EngineLauncher, GuestInspector};
use crate::matcher::ManifestMatcher;
use crate::session::Session;
use crate::snapshot::SnapshotController;
use crate::ScanError;

/// The manifest as loaded at process start: either the compiled matcher or
/// the reason it could not be loaded. Read-only for the process lifetime.
pub type SharedManifest = Result<Arc<ManifestMatcher>, Arc<str>>;

/// Loads the manifest once for the whole process.
///
/// A failure is kept rather than returned so the process can still start
/// and report [`ScanError::ManifestLoadFailure`] per scan.
#[must_use]
pub fn load_manifest(path: impl AsRef<Path>) -> SharedManifest {
    let path = path.as_ref();
    match ManifestMatcher::load(path) {
        Ok(matcher) => {
            tracing::info!(path = %path.display(), entries = matcher.len(), "manifest loaded");
            Ok(Arc::new(matcher))
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "manifest could not be loaded");
            Err(Arc::from(e.to_string()))
        }
    }
}

/// Forward-path progress of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScanState {
    Init,
    Connected,
    VmResolved,
    Snapshotted,
    DisksExported,
    Inspected,
    Matched,
    Done,
}

impl ScanState {
    fn advance(&mut self, next: Self) {
        tracing::debug!(from = %self, to = %next, "scan state");
        *self = next;
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Connected => "connected",
            Self::VmResolved => "vm_resolved",
            Self::Snapshotted => "snapshotted",
            Self::DisksExported => "disks_exported",
            Self::Inspected => "inspected",
            Self::Matched => "matched",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Runs scans. Holds only read-only, process-wide state, so one instance
/// serves any number of concurrent scans.
pub struct ScanCoordinator {
    connector: Arc<dyn HypervisorConnector>,
    engines: Arc<dyn EngineLauncher>,
    config: Arc<ProbeConfig>,
    manifest: SharedManifest,
}

impl fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanCoordinator")
            .field("work_dir", &self.config.general.work_dir)
            .field("manifest_loaded", &self.manifest.is_ok())
            .finish_non_exhaustive()
    }
}

impl ScanCoordinator {
    #[must_use]
    pub fn new(
        connector: Arc<dyn HypervisorConnector>,
        engines: Arc<dyn EngineLauncher>,
        config: Arc<ProbeConfig>,
        manifest: SharedManifest,
    ) -> Self {
        Self { connector, engines, config, manifest }
    }

    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Whether the manifest loaded at startup is usable.
    #[must_use]
    pub fn manifest_loaded(&self) -> bool {
        self.manifest.is_ok()
    }

    /// Runs one full scan and tears everything down before returning.
    ///
    /// # Errors
    /// Returns the [`ScanError`] of the first forward-path step that failed.
    /// Teardown failures are logged, never returned.
    pub async fn scan(&self, request: &ScanRequest) -> Result<Inventory, ScanError> {
        self.scan_as(ScanId::new(), request).await
    }

    /// Same as [`ScanCoordinator::scan`], correlating log events with a
    /// caller-assigned `scan_id`.
    ///
    /// # Errors
    /// See [`ScanCoordinator::scan`].
    pub async fn scan_as(&self, scan_id: ScanId, request: &ScanRequest) -> Result<Inventory, ScanError> {
        let span = tracing::info_span!("scan", scan_id = %scan_id, vm_id = %request.vm_id);
        self.run_scan(request).instrument(span).await
    }

    /// Runs [`ScanCoordinator::scan`] as an independent task whose outcome is
    /// observable through the returned handle.
    pub fn spawn(self: &Arc<Self>, request: ScanRequest) -> JoinHandle<Result<Inventory, ScanError>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.scan(&request).await })
    }

    /// Reads the VM's hardware without snapshotting or exporting anything.
    ///
    /// # Errors
    /// Returns session and lookup errors.
    pub async fn hardware(&self, request: &ScanRequest) -> Result<HardwareDescriptor, ScanError> {
        let span = tracing::info_span!("hardware", vm_id = %request.vm_id);
        async {
            let session = Session::connect(self.connector.as_ref(), &request.credentials).await?;
            let result: Result<HardwareDescriptor, ScanError> = async {
                let vm = session.resolve(&request.vm_id).await?;
                let hardware = session.hardware(&vm).await?;
                Ok(HardwareDescriptor::from_hardware(vm.moref, &hardware))
            }
            .await;
            session.disconnect().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run_scan(&self, request: &ScanRequest) -> Result<Inventory, ScanError> {
        let matcher = match &self.manifest {
            Ok(matcher) => Arc::clone(matcher),
            Err(reason) => {
                tracing::warn!(state = %ScanState::Init, "scan refused: manifest unavailable");
                return Err(ScanError::ManifestLoadFailure(reason.to_string()));
            }
        };

        let session = Session::connect(self.connector.as_ref(), &request.credentials).await?;
        let mut run = ScanRun {
            state: ScanState::Connected,
            exports: ExportOrchestrator::new(
                self.config.export.clone(),
                &self.config.general.work_dir,
                &request.vm_id,
            ),
            snapshots: SnapshotController::new(),
            inspector: None,
            session,
        };
        tracing::info!(state = %run.state, host = %run.session.host(), "session established");

        let result = run.forward(request, &matcher, self.engines.as_ref()).await;
        match &result {
            Ok(inventory) => tracing::info!(
                state = %run.state,
                roots = inventory.software.len(),
                disks = inventory.hardware.disks.len(),
                "scan complete"
            ),
            Err(e) => tracing::warn!(state = %run.state, kind = ?e.kind(), error = %e, "scan failed"),
        }
        run.teardown().await;
        result
    }
}

/// Resources owned by one scan in flight.
struct ScanRun {
    state: ScanState,
    session: Session,
    snapshots: SnapshotController,
    exports: ExportOrchestrator,
    inspector: Option<GuestInspector>,
}

impl ScanRun {
    async fn forward(
        &mut self,
        request: &ScanRequest,
        matcher: &ManifestMatcher,
        engines: &dyn EngineLauncher,
    ) -> Result<Inventory, ScanError> {
        let vm = self.session.resolve(&request.vm_id).await?;
        self.state.advance(ScanState::VmResolved);

        let hardware = self.session.hardware(&vm).await?;
        let hardware = HardwareDescriptor::from_hardware(vm.moref.clone(), &hardware);

        let snapshot = self.snapshots.create(&self.session, &vm).await?.reference.clone();
        self.state.advance(ScanState::Snapshotted);

        let source = ExportSource { credentials: &request.credentials, vm: &vm.moref, snapshot: &snapshot };
        let mut sockets: Vec<PathBuf> = Vec::with_capacity(hardware.disks.len());
        for disk in &hardware.disks {
            sockets.push(self.exports.export_disk(disk, source).await?);
        }
        self.state.advance(ScanState::DisksExported);

        let inspector = self.inspector.insert(GuestInspector::new(engines.open().await?));
        let roots = inspector.attach(&sockets).await?;
        self.state.advance(ScanState::Inspected);

        let software = inspector.match_roots(roots, matcher).await?;
        self.state.advance(ScanState::Matched);

        self.state.advance(ScanState::Done);
        Ok(Inventory { hardware, software })
    }

    /// Unmount, kill workers and remove sockets, remove the snapshot, log
    /// out. Each step runs even when an earlier one failed.
    async fn teardown(mut self) {
        tracing::debug!(state = %self.state, "teardown started");
        if let Some(mut inspector) = self.inspector.take() {
            inspector.teardown().await;
        }
        self.exports.teardown().await;
        self.snapshots.remove(&self.session).await;
        self.session.disconnect().await;
        tracing::debug!("teardown finished");
    }
}
