//! Session manager: one authenticated hypervisor session per scan.

use vmprobe_core::{Credentials, MoRef, VmHardware, VmId};

use crate::hypervisor::{HypervisorConnector, HypervisorSession};
use crate::ScanError;

/// Resolved reference to the VM under inspection.
///
/// Only valid while the [`Session`] that produced it is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct VmHandle {
    pub id: VmId,
    pub moref: MoRef,
}

/// An authenticated session bound to one scan.
pub struct Session {
    host: String,
    api: Box<dyn HypervisorSession>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("host", &self.host).finish_non_exhaustive()
    }
}

impl Session {
    /// Logs in to the management plane.
    ///
    /// # Errors
    /// Propagates [`ScanError::AuthenticationFailure`] and other connector errors.
    pub async fn connect(
        connector: &dyn HypervisorConnector,
        credentials: &Credentials,
    ) -> Result<Self, ScanError> {
        tracing::info!(host = %credentials.hostname, user = %credentials.username, "connecting to hypervisor");
        let api = connector.connect(credentials).await?;
        Ok(Self { host: credentials.hostname.clone(), api })
    }

    /// Management endpoint this session is logged in to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Looks a VM up by its stable identifier.
    ///
    /// # Errors
    /// Returns [`ScanError::VmNotFound`] when nothing matches and
    /// [`ScanError::AmbiguousVm`] when more than one object matches.
    pub async fn resolve(&self, vm_id: &VmId) -> Result<VmHandle, ScanError> {
        tracing::info!(vm_id = %vm_id, "looking up virtual machine");
        let mut matches = self.api.find_vms_by_uuid(vm_id).await?;
        match matches.len() {
            0 => Err(ScanError::VmNotFound(vm_id.clone())),
            1 => {
                let moref = matches.remove(0);
                tracing::debug!(vm_id = %vm_id, moref = %moref, "virtual machine resolved");
                Ok(VmHandle { id: vm_id.clone(), moref })
            }
            count => Err(ScanError::AmbiguousVm { vm_id: vm_id.clone(), count }),
        }
    }

    /// Reads the VM's current hardware configuration.
    ///
    /// # Errors
    /// Propagates management-plane errors.
    pub async fn hardware(&self, vm: &VmHandle) -> Result<VmHardware, ScanError> {
        self.api.hardware(&vm.moref).await
    }

    pub(crate) fn api(&self) -> &dyn HypervisorSession {
        self.api.as_ref()
    }

    /// Logs out, swallowing any failure.
    pub async fn disconnect(self) {
        match self.api.disconnect().await {
            Ok(()) => tracing::debug!(host = %self.host, "hypervisor session closed"),
            Err(e) => tracing::warn!(host = %self.host, error = %e, "ignoring disconnect failure"),
        }
    }
}
