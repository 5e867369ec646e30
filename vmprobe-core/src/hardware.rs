//! VM hardware layout.
//!
//! The hypervisor reports raw device state as [`VmHardware`] with a closed
//! [`HardwareDevice`] variant per device. [`HardwareDescriptor::from_hardware`]
//! folds it into the inventory shape returned to callers.

use serde::{Deserialize, Serialize};

use crate::id::MoRef;

/// Raw hardware configuration of a VM as read from the management plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmHardware {
    pub num_cpu: u32,
    pub num_cores_per_socket: u32,
    pub memory_mb: u64,
    pub power_state: PowerState,
    pub devices: Vec<HardwareDevice>,
    /// Host name reported by guest tools, if running.
    pub guest_hostname: Option<String>,
    /// Guest-reported network interfaces.
    pub guest_nics: Vec<GuestNic>,
}

impl VmHardware {
    /// Creates a hardware record with no devices and no guest information.
    #[must_use]
    pub fn new(num_cpu: u32, num_cores_per_socket: u32, memory_mb: u64, power_state: PowerState) -> Self {
        Self {
            num_cpu,
            num_cores_per_socket,
            memory_mb,
            power_state,
            devices: Vec::new(),
            guest_hostname: None,
            guest_nics: Vec::new(),
        }
    }
}

/// Power state of the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// The device kinds the probe understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HardwareDevice {
    /// A virtual disk backed by a file on a datastore.
    Disk(VirtualDisk),
    /// A virtual disk mapped onto a raw LUN.
    RawDeviceMappingDisk(VirtualDisk),
    /// A network adapter with a network backing.
    Ethernet(EthernetCard),
    /// Anything else (controllers, CD-ROMs, video cards...).
    Other { label: String },
}

/// Backing information of one virtual disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDisk {
    /// Device key within the VM.
    pub key: i32,
    /// Backing uuid.
    pub uuid: String,
    /// Backing file name, `"[datastore] dir/disk.vmdk"`.
    pub file_name: String,
    pub capacity_in_bytes: u64,
    pub datastore_name: String,
    /// Datastore summary URL, `"ds:///vmfs/volumes/..."`.
    pub datastore_url: String,
    pub thin_provisioned: bool,
}

/// A network adapter and the network it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetCard {
    pub label: String,
    pub mac_address: String,
    /// Adapter model, e.g. `VirtualVmxnet3`.
    pub adapter_type: String,
    /// Port group or distributed switch name, resolved by the hypervisor.
    pub lan_name: String,
}

/// One guest-reported network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestNic {
    pub mac_address: String,
    pub ip_addresses: Vec<IpAddress>,
}

/// An address with its prefix length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub ipaddress: String,
    pub prefix: u8,
}

/// One virtual disk as exposed in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDescriptor {
    pub id: String,
    pub key: i32,
    /// Datastore-relative path of the backing file.
    pub path: String,
    pub size: u64,
    pub storage_name: String,
    pub storage_path: String,
    pub is_sparse: bool,
    pub is_rdm: bool,
}

impl DiskDescriptor {
    fn from_disk(disk: &VirtualDisk, is_rdm: bool) -> Self {
        let prefix = format!("[{}] ", disk.datastore_name);
        Self {
            id: disk.uuid.clone(),
            key: disk.key,
            path: disk.file_name.replacen(&prefix, "", 1),
            size: disk.capacity_in_bytes,
            storage_name: disk.datastore_name.clone(),
            storage_path: disk.datastore_url.replacen("ds://", "", 1),
            is_sparse: disk.thin_provisioned,
            is_rdm,
        }
    }

    /// The datastore-qualified file path, `"[datastore] path"`.
    #[must_use]
    pub fn datastore_file(&self) -> String {
        format!("[{}] {}", self.storage_name, self.path)
    }
}

/// Network adapter as exposed in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicDescriptor {
    pub device_name: String,
    pub mac_address: String,
    pub adapter_type: String,
    pub lan_name: String,
    pub hostname: Option<String>,
    pub ipaddresses: Vec<IpAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareMetadata {
    pub vmware_moref: MoRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuDescriptor {
    pub total_cores: u32,
    pub cores_per_socket: u32,
}

/// Aggregated hardware section of the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HardwareDescriptor {
    pub metadata: HardwareMetadata,
    pub cpu: CpuDescriptor,
    /// Memory size in bytes.
    pub memory: u64,
    pub power_state: PowerState,
    pub disks: Vec<DiskDescriptor>,
    pub nics: Vec<NicDescriptor>,
}

impl HardwareDescriptor {
    /// Folds raw hardware state into the inventory shape.
    #[must_use]
    pub fn from_hardware(moref: MoRef, hardware: &VmHardware) -> Self {
        let mut disks = Vec::new();
        let mut nics = Vec::new();

        for device in &hardware.devices {
            match device {
                HardwareDevice::Disk(disk) => disks.push(DiskDescriptor::from_disk(disk, false)),
                HardwareDevice::RawDeviceMappingDisk(disk) => {
                    disks.push(DiskDescriptor::from_disk(disk, true));
                }
                HardwareDevice::Ethernet(card) => {
                    let ipaddresses = hardware
                        .guest_nics
                        .iter()
                        .filter(|nic| nic.mac_address.eq_ignore_ascii_case(&card.mac_address))
                        .flat_map(|nic| nic.ip_addresses.iter().cloned())
                        .collect();
                    nics.push(NicDescriptor {
                        device_name: card.label.clone(),
                        mac_address: card.mac_address.clone(),
                        adapter_type: card.adapter_type.clone(),
                        lan_name: card.lan_name.clone(),
                        hostname: hardware.guest_hostname.clone(),
                        ipaddresses,
                    });
                }
                HardwareDevice::Other { .. } => {}
            }
        }

        Self {
            metadata: HardwareMetadata { vmware_moref: moref },
            cpu: CpuDescriptor {
                total_cores: hardware.num_cpu,
                cores_per_socket: hardware.num_cores_per_socket,
            },
            memory: hardware.memory_mb.saturating_mul(1 << 20),
            power_state: hardware.power_state,
            disks,
            nics,
        }
    }
}
