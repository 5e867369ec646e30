//! Disk export orchestrator.
//!
//! Launches one `nbdkit` process per virtual disk, each serving the frozen
//! snapshot state of that disk read-only on a Unix socket under the scan's
//! directory (`<work_dir>/<vm_id>/<disk_id>.sock`). Every launched process is
//! retained so teardown can kill it even when a later disk fails to export.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use vmprobe_core::{Credentials, DiskDescriptor, MoRef, VmId};

use crate::config::ExportConfig;
use crate::ScanError;

/// A live export of one disk.
#[derive(Debug)]
#[non_exhaustive]
pub struct ExportEndpoint {
    pub disk_id: String,
    /// Unix socket the worker serves on.
    pub socket_path: PathBuf,
    /// The worker process.
    pub process: Child,
    /// Set once the socket has appeared.
    pub ready: bool,
}

/// Hypervisor-side coordinates of the disk state to export.
#[derive(Debug, Clone, Copy)]
pub struct ExportSource<'a> {
    pub credentials: &'a Credentials,
    pub vm: &'a MoRef,
    pub snapshot: &'a MoRef,
}

/// Owns every export worker launched for one scan.
#[derive(Debug)]
pub struct ExportOrchestrator {
    config: ExportConfig,
    scan_dir: PathBuf,
    endpoints: Vec<ExportEndpoint>,
}

impl ExportOrchestrator {
    /// Creates an orchestrator whose sockets live in `<work_dir>/<vm_id>`.
    #[must_use]
    pub fn new(config: ExportConfig, work_dir: &Path, vm_id: &VmId) -> Self {
        Self { config, scan_dir: work_dir.join(vm_id.as_str()), endpoints: Vec::new() }
    }

    /// Directory holding this scan's sockets.
    #[must_use]
    pub fn scan_dir(&self) -> &Path {
        &self.scan_dir
    }

    /// Socket path for a disk, unique per VM and disk id.
    #[must_use]
    pub fn socket_path(&self, disk_id: &str) -> PathBuf {
        let name: String = disk_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect();
        self.scan_dir.join(format!("{name}.sock"))
    }

    /// Endpoints launched so far, in launch order.
    #[must_use]
    pub fn endpoints(&self) -> &[ExportEndpoint] {
        &self.endpoints
    }

    /// Command-line arguments for the worker serving `disk` on `socket`.
    #[must_use]
    pub fn worker_args(&self, disk: &DiskDescriptor, socket: &Path, source: ExportSource<'_>) -> Vec<OsString> {
        let mut libdir = OsString::from("libdir=");
        libdir.push(self.config.vddk_libdir.as_os_str());

        vec![
            "--readonly".into(),
            "--exit-with-parent".into(),
            "--newstyle".into(),
            "--unix".into(),
            socket.as_os_str().to_owned(),
            self.config.plugin.clone().into(),
            libdir,
            format!("server={}", source.credentials.hostname).into(),
            format!("user={}", source.credentials.username).into(),
            format!("password={}", source.credentials.password).into(),
            format!("thumbprint={}", source.credentials.fingerprint).into(),
            format!("file={}", disk.datastore_file()).into(),
            format!("vm=moref={}", source.vm).into(),
            format!("snapshot={}", source.snapshot).into(),
        ]
    }

    /// Launches the worker for one disk and waits for its socket, returning
    /// the socket path once it is ready.
    ///
    /// The endpoint is retained whether or not it became ready, so a
    /// timed-out worker is still killed by [`ExportOrchestrator::teardown`].
    ///
    /// # Errors
    /// Returns [`ScanError::ExportLaunchFailure`] if the process cannot be
    /// started or exits before serving, [`ScanError::ExportTimeout`] if the
    /// socket does not appear within the configured number of checks.
    pub async fn export_disk(
        &mut self,
        disk: &DiskDescriptor,
        source: ExportSource<'_>,
    ) -> Result<PathBuf, ScanError> {
        let socket_path = self.socket_path(&disk.id);
        if self.endpoints.iter().any(|e| e.socket_path == socket_path) {
            return Err(ScanError::ExportLaunchFailure {
                disk_id: disk.id.clone(),
                reason: format!("socket {} already in use by this scan", socket_path.display()),
            });
        }

        tokio::fs::create_dir_all(&self.scan_dir).await?;
        remove_stale_socket(&socket_path).await?;

        let args = self.worker_args(disk, &socket_path, source);
        tracing::info!(
            disk_id = %disk.id,
            socket = %socket_path.display(),
            file = %disk.datastore_file(),
            snapshot = %source.snapshot,
            "launching export worker"
        );

        let process = Command::new(&self.config.binary)
            .args(&args)
            .env("LD_LIBRARY_PATH", self.config.vddk_libdir.join("lib64"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::ExportLaunchFailure {
                disk_id: disk.id.clone(),
                reason: format!("exec {}: {e}", self.config.binary.display()),
            })?;

        let mut endpoint = ExportEndpoint {
            disk_id: disk.id.clone(),
            socket_path,
            process,
            ready: false,
        };
        let waited = wait_for_socket(&mut endpoint, self.config.ready_attempts, self.config.ready_interval()).await;
        endpoint.ready = waited.is_ok();
        let socket_path = endpoint.socket_path.clone();
        self.endpoints.push(endpoint);
        waited?;

        tracing::info!(disk_id = %disk.id, socket = %socket_path.display(), "export ready");
        Ok(socket_path)
    }

    /// Kills every worker, then removes the sockets of confirmed-dead
    /// workers and the scan directory. Never fails; problems are logged.
    pub async fn teardown(&mut self) {
        let mut terminated = Vec::with_capacity(self.endpoints.len());
        for mut endpoint in self.endpoints.drain(..) {
            let dead = match endpoint.process.kill().await {
                Ok(()) => true,
                Err(e) => {
                    let exited = matches!(endpoint.process.try_wait(), Ok(Some(_)));
                    if !exited {
                        tracing::error!(disk_id = %endpoint.disk_id, error = %e, "failed to kill export worker");
                    }
                    exited
                }
            };
            tracing::debug!(disk_id = %endpoint.disk_id, dead, "export worker stopped");
            terminated.push((endpoint.socket_path, dead));
        }

        for (socket_path, dead) in terminated {
            if !dead {
                tracing::warn!(socket = %socket_path.display(), "leaving socket of a live worker in place");
                continue;
            }
            if let Err(e) = remove_stale_socket(&socket_path).await {
                tracing::warn!(socket = %socket_path.display(), error = %e, "failed to remove socket");
            }
        }

        match tokio::fs::remove_dir(&self.scan_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.scan_dir.display(), error = %e, "failed to remove scan directory");
            }
        }
    }
}

/// Polls for the worker's socket file.
async fn wait_for_socket(endpoint: &mut ExportEndpoint, attempts: u32, interval: Duration) -> Result<(), ScanError> {
    for attempt in 0..attempts {
        if endpoint.socket_path.exists() {
            return Ok(());
        }
        if let Ok(Some(status)) = endpoint.process.try_wait() {
            return Err(ScanError::ExportLaunchFailure {
                disk_id: endpoint.disk_id.clone(),
                reason: format!("worker exited before serving: {status}"),
            });
        }
        tracing::debug!(disk_id = %endpoint.disk_id, attempt, "waiting for export socket");
        tokio::time::sleep(interval).await;
    }
    if endpoint.socket_path.exists() {
        return Ok(());
    }
    Err(ScanError::ExportTimeout {
        disk_id: endpoint.disk_id.clone(),
        socket: endpoint.socket_path.clone(),
        attempts,
    })
}

async fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_id(id: &str) -> VmId {
        match VmId::new(id) {
            Ok(v) => v,
            Err(e) => panic!("invalid vm id: {e}"),
        }
    }

    fn disk() -> DiskDescriptor {
        DiskDescriptor {
            id: "6000C29a-1b2c".to_owned(),
            key: 2000,
            path: "web01/web01.vmdk".to_owned(),
            size: 1 << 30,
            storage_name: "datastore1".to_owned(),
            storage_path: "/vmfs/volumes/ds1/".to_owned(),
            is_sparse: false,
            is_rdm: false,
        }
    }

    #[test]
    fn socket_paths_are_namespaced_by_vm_and_disk() {
        let a = ExportOrchestrator::new(ExportConfig::default(), Path::new("/tmp"), &vm_id("vm-a"));
        let b = ExportOrchestrator::new(ExportConfig::default(), Path::new("/tmp"), &vm_id("vm-b"));
        assert_eq!(a.socket_path("d1"), PathBuf::from("/tmp/vm-a/d1.sock"));
        assert_ne!(a.socket_path("d1"), b.socket_path("d1"));
        assert_ne!(a.socket_path("d1"), a.socket_path("d2"));
    }

    #[test]
    fn socket_path_sanitizes_disk_id() {
        let orch = ExportOrchestrator::new(ExportConfig::default(), Path::new("/tmp"), &vm_id("vm"));
        assert_eq!(orch.socket_path("../x y"), PathBuf::from("/tmp/vm/.._x_y.sock"));
    }

    #[test]
    fn worker_args_target_snapshot_state() {
        let orch = ExportOrchestrator::new(ExportConfig::default(), Path::new("/tmp"), &vm_id("vm"));
        let creds = Credentials {
            hostname: "vc.example".to_owned(),
            username: "root".to_owned(),
            password: "pw".to_owned(),
            fingerprint: "AA:BB".to_owned(),
        };
        let source = ExportSource {
            credentials: &creds,
            vm: &MoRef::new("vm-42"),
            snapshot: &MoRef::new("snapshot-7"),
        };
        let socket = orch.socket_path("d1");
        let args: Vec<String> = orch
            .worker_args(&disk(), &socket, source)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..5], ["--readonly", "--exit-with-parent", "--newstyle", "--unix", "/tmp/vm/d1.sock"]);
        assert_eq!(args[5], "vddk");
        assert!(args.contains(&"libdir=/opt/vmware-vix-disklib-distrib".to_owned()));
        assert!(args.contains(&"file=[datastore1] web01/web01.vmdk".to_owned()));
        assert!(args.contains(&"vm=moref=vm-42".to_owned()));
        assert!(args.contains(&"snapshot=snapshot-7".to_owned()));
        assert!(args.contains(&"thumbprint=AA:BB".to_owned()));
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_failure_with_no_endpoint() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let config = ExportConfig {
            binary: PathBuf::from("/nonexistent/nbdkit"),
            ..ExportConfig::default()
        };
        let mut orch = ExportOrchestrator::new(config, dir.path(), &vm_id("vm"));
        let creds = Credentials {
            hostname: "h".to_owned(),
            username: "u".to_owned(),
            password: "p".to_owned(),
            fingerprint: "f".to_owned(),
        };
        let source = ExportSource { credentials: &creds, vm: &MoRef::new("vm-1"), snapshot: &MoRef::new("s-1") };
        let result = orch.export_disk(&disk(), source).await;
        assert!(matches!(result, Err(ScanError::ExportLaunchFailure { .. })));
        assert!(orch.endpoints().is_empty());
        orch.teardown().await;
        assert!(!orch.scan_dir().exists(), "teardown removes the empty scan directory");
    }
}
