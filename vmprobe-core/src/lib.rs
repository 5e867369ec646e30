//! Core types for the vmprobe virtual machine inventory probe.
//!
//! Defines the validated scan request, the hardware model reported by the
//! hypervisor, the artifact manifest and the inventory result.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod hardware;
pub mod id;
pub mod inventory;
pub mod manifest;
pub mod request;

pub use error::CoreError;
pub use hardware::{
    CpuDescriptor, DiskDescriptor, EthernetCard, GuestNic, HardwareDescriptor, HardwareDevice,
    HardwareMetadata, IpAddress, NicDescriptor, PowerState, VirtualDisk, VmHardware,
};
pub use id::{MoRef, ScanId, VmId};
pub use inventory::{GuestRoot, Inventory, MatchedFile, OsIdentity};
pub use manifest::{Manifest, ManifestEntry, WILDCARD};
pub use request::{Credentials, ScanRequest, ScanRequestBody};
