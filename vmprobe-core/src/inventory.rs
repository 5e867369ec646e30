use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hardware::HardwareDescriptor;

/// Identity metadata of one detected operating system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsIdentity {
    /// Product name, e.g. `"Red Hat Enterprise Linux Server 7.9 (Maipo)"`.
    pub name: String,
    pub major_version: u32,
    pub minor_version: u32,
    /// OS family, e.g. `linux` or `windows`.
    #[serde(rename = "type")]
    pub os_type: String,
    pub distro: String,
    pub arch: String,
    pub product_variant: String,
    pub package_format: String,
    pub package_management: String,
    pub hostname: String,
}

/// One resolved artifact from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedFile {
    /// Resolved path inside the guest filesystem.
    pub name: String,
    /// Text content, when the manifest entry asked for it.
    pub content: Option<String>,
}

/// One operating-system installation found on the VM's disks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GuestRoot {
    /// Device holding the root filesystem.
    #[serde(skip_serializing, default)]
    pub root: String,
    pub filesystems: Vec<String>,
    /// Mountpoint to device.
    pub mountpoints: BTreeMap<String, String>,
    #[serde(flatten)]
    pub identity: OsIdentity,
    pub files: Vec<MatchedFile>,
}

impl GuestRoot {
    /// Creates a root with no matched files yet.
    #[must_use]
    pub fn new(
        root: String,
        filesystems: Vec<String>,
        mountpoints: BTreeMap<String, String>,
        identity: OsIdentity,
    ) -> Self {
        Self { root, filesystems, mountpoints, identity, files: Vec::new() }
    }
}

/// Final result of a successful scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub hardware: HardwareDescriptor,
    pub software: Vec<GuestRoot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_root_serializes_identity_inline() {
        let mut mountpoints = BTreeMap::new();
        mountpoints.insert("/".to_owned(), "/dev/sda2".to_owned());
        let mut root = GuestRoot::new(
            "/dev/sda2".to_owned(),
            vec!["/dev/sda1".to_owned(), "/dev/sda2".to_owned()],
            mountpoints,
            OsIdentity {
                name: "CentOS Linux release 7".to_owned(),
                major_version: 7,
                os_type: "linux".to_owned(),
                ..OsIdentity::default()
            },
        );
        root.files.push(MatchedFile { name: "/etc/hosts".to_owned(), content: None });

        let json = match serde_json::to_value(&root) {
            Ok(v) => v,
            Err(e) => panic!("serialization failed: {e}"),
        };
        assert_eq!(json["type"], "linux");
        assert_eq!(json["major_version"], 7);
        assert_eq!(json["mountpoints"]["/"], "/dev/sda2");
        assert!(json["files"][0]["content"].is_null());
        assert!(json.get("root").is_none(), "internal root handle must not leak");
    }
}
