//! Hypervisor management-plane abstraction.
//!
//! The transport (SOAP/REST session handling, TLS) lives behind these traits
//! so the scan pipeline can be driven against vSphere or an in-memory fake
//! without changing the coordination logic.

use async_trait::async_trait;
use vmprobe_core::{Credentials, MoRef, VmHardware, VmId};

use crate::ScanError;

/// Parameters of a protective snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct SnapshotSpec {
    pub name: String,
    pub description: String,
    /// Include guest memory in the snapshot.
    pub memory: bool,
    /// Flush guest filesystem buffers before taking the snapshot.
    pub quiesce: bool,
}

/// Opens authenticated sessions against a management endpoint.
///
/// Implementations must accept self-signed or otherwise unverified TLS
/// certificates; target environments run private certificate authorities.
#[async_trait]
pub trait HypervisorConnector: Send + Sync {
    /// Log in with the given credentials.
    ///
    /// # Errors
    /// Returns [`ScanError::AuthenticationFailure`] if the login is rejected,
    /// [`ScanError::HypervisorFailure`] if the endpoint is unreachable.
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn HypervisorSession>, ScanError>;
}

/// One authenticated management-plane session.
///
/// # Cancel Safety
/// Methods that wait on hypervisor tasks are not cancel safe: dropping the
/// future leaves the task running on the hypervisor side.
#[async_trait]
pub trait HypervisorSession: Send + Sync {
    /// Every VM whose `config.uuid` equals `vm_id`.
    ///
    /// # Errors
    /// Returns [`ScanError::HypervisorFailure`] if the lookup itself fails.
    async fn find_vms_by_uuid(&self, vm_id: &VmId) -> Result<Vec<MoRef>, ScanError>;

    /// Current hardware configuration of a VM.
    ///
    /// # Errors
    /// Returns [`ScanError::HypervisorFailure`] on API errors.
    async fn hardware(&self, vm: &MoRef) -> Result<VmHardware, ScanError>;

    /// Creates a snapshot and waits for the hypervisor task to finish.
    ///
    /// # Errors
    /// Returns [`ScanError::HypervisorFailure`] if the task fails.
    async fn create_snapshot(&self, vm: &MoRef, spec: &SnapshotSpec) -> Result<MoRef, ScanError>;

    /// Removes a snapshot (without its children) and waits for the task.
    ///
    /// # Errors
    /// Returns [`ScanError::HypervisorFailure`] if the task fails.
    async fn remove_snapshot(&self, snapshot: &MoRef) -> Result<(), ScanError>;

    /// Logs out.
    ///
    /// # Errors
    /// Returns [`ScanError::HypervisorFailure`] if the logout call fails.
    async fn disconnect(&self) -> Result<(), ScanError>;
}
