//! Snapshot controller: protects the VM's disks for the duration of a scan.

use chrono::{DateTime, Utc};
use vmprobe_core::MoRef;

use crate::hypervisor::SnapshotSpec;
use crate::session::{Session, VmHandle};
use crate::ScanError;

/// A point-in-time, quiesced snapshot owned by one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Snapshot {
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Hypervisor reference, handed to the export workers.
    pub reference: MoRef,
}

impl SnapshotSpec {
    /// Quiesced, memory-less snapshot named after `now`.
    #[must_use]
    pub fn for_scan(now: DateTime<Utc>) -> Self {
        Self {
            name: format!("{}-vm-analysis", now.format("%Y%m%d%H%M%S")),
            description: format!("{} - VM Analysis", now.format("%Y-%m-%d %H:%M:%S")),
            memory: false,
            quiesce: true,
        }
    }
}

/// Holds at most one snapshot and guarantees it is removed at most once.
#[derive(Debug, Default)]
pub struct SnapshotController {
    current: Option<Snapshot>,
}

impl SnapshotController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the scan's snapshot and waits for the hypervisor to finish.
    ///
    /// # Errors
    /// Returns [`ScanError::SnapshotFailure`] if the hypervisor task fails or
    /// this controller already holds a snapshot.
    pub async fn create(&mut self, session: &Session, vm: &VmHandle) -> Result<&Snapshot, ScanError> {
        if let Some(existing) = &self.current {
            return Err(ScanError::SnapshotFailure {
                vm_id: vm.id.clone(),
                reason: format!("scan already holds snapshot {}", existing.reference),
            });
        }

        let now = Utc::now();
        let spec = SnapshotSpec::for_scan(now);
        tracing::info!(vm_id = %vm.id, snapshot = %spec.name, "creating snapshot to protect the VM disks");

        let reference = session
            .api()
            .create_snapshot(&vm.moref, &spec)
            .await
            .map_err(|e| ScanError::SnapshotFailure { vm_id: vm.id.clone(), reason: e.to_string() })?;

        tracing::info!(vm_id = %vm.id, snapshot = %reference, "snapshot created");

        Ok(self.current.insert(Snapshot {
            name: spec.name,
            description: spec.description,
            created_at: now,
            reference,
        }))
    }

    /// The snapshot currently held, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    /// Removes the held snapshot. A no-op when none is held.
    ///
    /// Failures are logged, never returned: the scan outcome is already
    /// decided when this runs. The snapshot is forgotten either way, so a
    /// second call never reaches the hypervisor.
    pub async fn remove(&mut self, session: &Session) {
        let Some(snapshot) = self.current.take() else {
            return;
        };
        tracing::info!(snapshot = %snapshot.reference, "removing snapshot");
        if let Err(e) = session.api().remove_snapshot(&snapshot.reference).await {
            tracing::error!(
                snapshot = %snapshot.reference,
                name = %snapshot.name,
                error = %e,
                "snapshot removal failed; it must be deleted manually"
            );
        }
    }
}
