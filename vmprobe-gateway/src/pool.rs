//! In-flight scan registry.
//!
//! At most one scan per VM may run at a time: two scans of the same VM would
//! share a socket namespace and each hold a snapshot. A VM is registered when
//! its scan task starts and released when the task ends, not when the HTTP
//! request that started it goes away.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Instant,
};

use vmprobe_core::{ScanId, VmId};

use crate::error::GatewayError;

/// Metadata stored for each running scan.
#[derive(Debug)]
pub struct ScanEntry {
    pub scan_id: ScanId,
    /// Wall-clock time at which the scan was accepted.
    pub started_at: Instant,
}

/// Thread-safe registry of VMs with a scan in flight.
#[derive(Debug, Default)]
pub struct ScanRegistry {
    entries: RwLock<HashMap<VmId, ScanEntry>>,
}

impl ScanRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a scan of `vm_id`. The VM is released when the returned
    /// guard is dropped.
    ///
    /// # Errors
    /// Returns [`GatewayError::ScanInProgress`] if the VM is already registered.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned (a previous thread panicked
    /// while holding the write lock).
    pub fn begin(self: &Arc<Self>, vm_id: &VmId) -> Result<ScanGuard, GatewayError> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut entries = self.entries.write().expect("scan registry write lock poisoned");
        if entries.contains_key(vm_id) {
            return Err(GatewayError::ScanInProgress(vm_id.clone()));
        }
        let scan_id = ScanId::new();
        entries.insert(vm_id.clone(), ScanEntry { scan_id, started_at: Instant::now() });
        Ok(ScanGuard { registry: Arc::clone(self), vm_id: vm_id.clone(), scan_id })
    }

    /// Return `true` if a scan of the VM is registered.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn contains(&self, vm_id: &VmId) -> bool {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.entries
            .read()
            .expect("scan registry read lock poisoned")
            .contains_key(vm_id)
    }

    /// Number of scans in flight.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.entries.read().expect("scan registry read lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, vm_id: &VmId) {
        // Dropping a guard must not panic, so poisoning is tolerated here.
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = entries.remove(vm_id) {
            tracing::debug!(
                vm_id = %vm_id,
                scan_id = %entry.scan_id,
                elapsed_ms = entry.started_at.elapsed().as_millis(),
                "scan released"
            );
        }
    }
}

/// Keeps a VM registered while alive.
#[derive(Debug)]
pub struct ScanGuard {
    registry: Arc<ScanRegistry>,
    vm_id: VmId,
    scan_id: ScanId,
}

impl ScanGuard {
    #[must_use]
    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.registry.release(&self.vm_id);
    }
}
