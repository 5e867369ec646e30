//! [`InspectionEngine`] backed by a `guestfish --listen` server.
//!
//! One guestfish daemon is started per scan; every engine call is a
//! `guestfish --remote=<pid> <command> <args..>` invocation against it, so
//! concurrent scans never share libguestfs state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use vmprobe_core::OsIdentity;

use crate::config::InspectorConfig;
use crate::inspector::{EngineLauncher, GuestFilesystem, InspectionEngine};
use crate::ScanError;

/// Starts one guestfish server per scan.
#[derive(Debug, Clone)]
pub struct GuestfishLauncher {
    binary: PathBuf,
    backend: String,
}

impl GuestfishLauncher {
    #[must_use]
    pub fn new(config: &InspectorConfig) -> Self {
        Self { binary: config.guestfish_binary.clone(), backend: config.backend.clone() }
    }
}

#[async_trait]
impl EngineLauncher for GuestfishLauncher {
    async fn open(&self) -> Result<Box<dyn InspectionEngine>, ScanError> {
        // The forked server keeps any inherited stderr pipe open for its
        // whole life, so only stdout is piped and only its first line read.
        let mut parent = Command::new(&self.binary)
            .arg("--listen")
            .env("LIBGUESTFS_BACKEND", &self.backend)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::InspectionFailure(format!("exec {}: {e}", self.binary.display())))?;

        let stdout = parent
            .stdout
            .take()
            .ok_or_else(|| ScanError::InspectionFailure("guestfish --listen: stdout not captured".to_owned()))?;
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .await
            .map_err(|e| ScanError::InspectionFailure(format!("guestfish --listen: read stdout: {e}")))?;

        let status = parent
            .wait()
            .await
            .map_err(|e| ScanError::InspectionFailure(format!("guestfish --listen: wait: {e}")))?;
        if !status.success() {
            return Err(ScanError::InspectionFailure(format!("guestfish --listen exited with {status}")));
        }

        let pid = parse_listen_pid(&line).ok_or_else(|| {
            ScanError::InspectionFailure(format!("unexpected guestfish --listen output: {}", line.trim()))
        })?;
        tracing::debug!(pid, backend = %self.backend, "guestfish server started");
        Ok(Box::new(GuestfishEngine { binary: self.binary.clone(), pid }))
    }
}

/// Client of one running guestfish server.
#[derive(Debug)]
pub struct GuestfishEngine {
    binary: PathBuf,
    pid: u32,
}

impl GuestfishEngine {
    /// Runs one remote command and returns its stdout.
    async fn call(&self, command: &str, args: &[&str]) -> Result<String, ScanError> {
        let output = Command::new(&self.binary)
            .arg(format!("--remote={}", self.pid))
            .arg("--")
            .arg(command)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScanError::InspectionFailure(format!("exec {}: {e}", self.binary.display())))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        // The server reports command errors on its own stderr, so the client
        // often has nothing more to say than its exit status.
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = if stderr.trim().is_empty() { output.status.to_string() } else { stderr.trim().to_owned() };
        Err(ScanError::InspectionFailure(format!("{command}: {reason}")))
    }

    async fn call_lines(&self, command: &str, args: &[&str]) -> Result<Vec<String>, ScanError> {
        Ok(parse_lines(&self.call(command, args).await?))
    }

    async fn call_bool(&self, command: &str, args: &[&str]) -> Result<bool, ScanError> {
        let out = self.call(command, args).await?;
        parse_bool(&out).ok_or_else(|| ScanError::InspectionFailure(format!("{command}: not a boolean: {}", out.trim())))
    }

    async fn call_string(&self, command: &str, root: &str) -> Result<String, ScanError> {
        Ok(self.call(command, &[root]).await?.trim_end_matches('\n').to_owned())
    }

    async fn call_u32(&self, command: &str, root: &str) -> Result<u32, ScanError> {
        let out = self.call(command, &[root]).await?;
        out.trim()
            .parse()
            .map_err(|e| ScanError::InspectionFailure(format!("{command}: '{}': {e}", out.trim())))
    }
}

#[async_trait]
impl GuestFilesystem for GuestfishEngine {
    async fn find(&self, dir: &str) -> Result<Vec<String>, ScanError> {
        self.call_lines("find", &[dir]).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, ScanError> {
        self.call_lines("ls", &[dir]).await
    }

    async fn is_dir(&self, path: &str) -> Result<bool, ScanError> {
        self.call_bool("is-dir", &[path]).await
    }

    async fn is_file(&self, path: &str, follow_symlinks: bool) -> Result<bool, ScanError> {
        let follow = format!("followsymlinks:{follow_symlinks}");
        self.call_bool("is-file", &[path, follow.as_str()]).await
    }

    async fn read_lines(&self, path: &str) -> Result<Vec<String>, ScanError> {
        self.call_lines("read-lines", &[path]).await
    }
}

#[async_trait]
impl InspectionEngine for GuestfishEngine {
    async fn add_drive_ro(&self, socket: &Path) -> Result<(), ScanError> {
        let server = format!("server:unix:{}", socket.display());
        self.call("add-drive", &["", "readonly:true", "format:raw", "protocol:nbd", server.as_str()])
            .await
            .map(drop)
    }

    async fn launch(&self) -> Result<(), ScanError> {
        self.call("run", &[]).await.map(drop)
    }

    async fn inspect_os(&self) -> Result<Vec<String>, ScanError> {
        self.call_lines("inspect-os", &[]).await
    }

    async fn filesystems(&self, root: &str) -> Result<Vec<String>, ScanError> {
        self.call_lines("inspect-get-filesystems", &[root]).await
    }

    async fn mountpoints(&self, root: &str) -> Result<BTreeMap<String, String>, ScanError> {
        let out = self.call("inspect-get-mountpoints", &[root]).await?;
        Ok(parse_table(&out))
    }

    async fn identity(&self, root: &str) -> Result<OsIdentity, ScanError> {
        Ok(OsIdentity {
            name: self.call_string("inspect-get-product-name", root).await?,
            major_version: self.call_u32("inspect-get-major-version", root).await?,
            minor_version: self.call_u32("inspect-get-minor-version", root).await?,
            os_type: self.call_string("inspect-get-type", root).await?,
            distro: self.call_string("inspect-get-distro", root).await?,
            arch: self.call_string("inspect-get-arch", root).await?,
            product_variant: self.call_string("inspect-get-product-variant", root).await?,
            package_format: self.call_string("inspect-get-package-format", root).await?,
            package_management: self.call_string("inspect-get-package-management", root).await?,
            hostname: self.call_string("inspect-get-hostname", root).await?,
        })
    }

    async fn mount_ro(&self, device: &str, mountpoint: &str) -> Result<(), ScanError> {
        self.call("mount-ro", &[device, mountpoint]).await.map(drop)
    }

    async fn umount_all(&self) -> Result<(), ScanError> {
        self.call("umount-all", &[]).await.map(drop)
    }

    async fn shutdown(&self) -> Result<(), ScanError> {
        self.call("exit", &[]).await.map(drop)
    }
}

/// Extracts the PID from `GUESTFISH_PID=1234; export GUESTFISH_PID`.
fn parse_listen_pid(output: &str) -> Option<u32> {
    let rest = output.trim().strip_prefix("GUESTFISH_PID=")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn parse_lines(output: &str) -> Vec<String> {
    output.lines().map(str::to_owned).collect()
}

fn parse_bool(output: &str) -> Option<bool> {
    match output.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Parses guestfish's `key: value` rendering of a hash table.
fn parse_table(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}
