//! Per-path filesystem metadata queries.
//!
//! [`VolumeProbe`] covers the handful of properties identity resolution needs
//! from the operating system. Queries never fail: a property that can't be
//! determined is reported as absent (`None` / `false`).
//!
//! # Owning mount
//!
//! The mount table snapshot can lag behind the system by up to the refresh
//! throttle. Before trusting the snapshot's deepest mount for a path,
//! [`SystemProbe`] checks that the mount point is live and sits on the same
//! device as the path. On a mismatch it re-enumerates through its own
//! [`MountSource`] and picks the deepest mount that does agree.
//!
//! # Volume details
//!
//! UUID, removable and encryption flags come from [`crate::details`] and are
//! memoized per snapshot. Network filesystems rarely expose a UUID; for those
//! `SystemProbe` derives a remounting URL from the mount source instead.

use std::path::Path;
#[cfg(target_os = "linux")]
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(target_os = "macos")]
use std::time::Duration;

use anyhow::Result;
#[cfg(any(target_os = "linux", target_os = "macos"))]
use anyhow::Context;
use nix::libc::dev_t;

use crate::details::VolumeDetails;
use crate::mount_source::{MountSource, SystemMount, SystemMountSource};
use crate::mount_table::MountedVolumeSet;

/// Filesystem metadata source used by the resolver.
pub trait VolumeProbe: Send + Sync {
    /// Whether the path exists and can be reached.
    fn exists(&self, path: &Path) -> bool;

    /// Whether the current process may read the path.
    fn is_readable(&self, path: &Path) -> bool;

    /// Whether the path is the root of a mounted volume.
    fn is_volume(&self, path: &Path) -> bool;

    /// The native UUID of the volume containing `path`.
    fn volume_uuid(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<String>;

    /// A URL that could be used to remount the volume containing `path`.
    fn remounting_url(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<String>;

    /// The mount holding `path`.
    fn owning_mount(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<SystemMount> {
        volumes.enclosing_mount(path).cloned()
    }

    /// Removable, encryption and role details of the volume holding `path`.
    fn volume_details(&self, _path: &Path, _volumes: &MountedVolumeSet) -> Option<VolumeDetails> {
        None
    }
}

/// Queries the live filesystem.
#[derive(Clone)]
pub struct SystemProbe {
    mounts: Arc<dyn MountSource>,
    #[cfg(target_os = "linux")]
    by_uuid_dir: PathBuf,
    #[cfg(target_os = "linux")]
    class_block_dir: PathBuf,
    #[cfg(target_os = "macos")]
    command_timeout: Duration,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(&crate::VolumeConfig::default())
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("SystemProbe");
        #[cfg(target_os = "linux")]
        s.field("by_uuid_dir", &self.by_uuid_dir)
            .field("class_block_dir", &self.class_block_dir);
        #[cfg(target_os = "macos")]
        s.field("command_timeout", &self.command_timeout);
        s.finish_non_exhaustive()
    }
}

impl SystemProbe {
    /// Create a probe using the timeouts from `config`.
    #[cfg_attr(not(target_os = "macos"), allow(unused_variables))]
    pub fn new(config: &crate::VolumeConfig) -> Self {
        Self {
            mounts: Arc::new(SystemMountSource),
            #[cfg(target_os = "linux")]
            by_uuid_dir: PathBuf::from("/dev/disk/by-uuid"),
            #[cfg(target_os = "linux")]
            class_block_dir: PathBuf::from("/sys/class/block"),
            #[cfg(target_os = "macos")]
            command_timeout: config.command_timeout,
        }
    }

    /// Re-enumerate mounts through `source` when the snapshot disagrees with
    /// the filesystem.
    #[must_use]
    pub fn with_mount_source(mut self, source: impl MountSource + 'static) -> Self {
        self.mounts = Arc::new(source);
        self
    }

    /// Read UUID symlinks and block device attributes from other directories
    /// (defaults: `/dev/disk/by-uuid`, `/sys/class/block`).
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn with_device_dirs(
        mut self,
        by_uuid: impl Into<PathBuf>,
        class_block: impl Into<PathBuf>,
    ) -> Self {
        self.by_uuid_dir = by_uuid.into();
        self.class_block_dir = class_block.into();
        self
    }
}

impl VolumeProbe for SystemProbe {
    fn exists(&self, path: &Path) -> bool {
        std::fs::metadata(path).is_ok()
    }

    fn is_readable(&self, path: &Path) -> bool {
        use nix::unistd::{AccessFlags, access};

        if access(path, AccessFlags::R_OK).is_err() {
            return false;
        }
        // Privacy protections (TCC on macOS) pass access(2) but fail on open
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => std::fs::read_dir(path).is_ok(),
            Ok(meta) if meta.is_file() => std::fs::File::open(path).is_ok(),
            Ok(_) => true,
            Err(_) => false,
        }
    }

    fn is_volume(&self, path: &Path) -> bool {
        use nix::sys::stat::stat;

        let Ok(own) = stat(path) else {
            return false;
        };
        let Some(parent) = path.parent() else {
            // Only "/" has no parent
            return true;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        match stat(parent) {
            // A different device, or ".." pointing back at itself
            Ok(up) => up.st_dev != own.st_dev || up.st_ino == own.st_ino,
            Err(_) => false,
        }
    }

    fn volume_uuid(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<String> {
        self.volume_details(path, volumes)?
            .uuid
            .filter(|uuid| !uuid.is_empty())
    }

    fn remounting_url(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<String> {
        remounting_url_for(&self.confirmed_mount(path, volumes)?)
    }

    fn owning_mount(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<SystemMount> {
        self.confirmed_mount(path, volumes)
    }

    fn volume_details(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<VolumeDetails> {
        let mount = self.confirmed_mount(path, volumes)?;
        volumes.memoize_details(&mount, || match self.lookup_details(&mount) {
            Ok(details) => Some(details),
            Err(e) => {
                tracing::debug!(
                    "Volume details lookup failed for {}: {:#}",
                    mount.mountpoint.display(),
                    e
                );
                None
            }
        })
    }
}

impl SystemProbe {
    /// The mount really holding `path`, checked against its device.
    fn confirmed_mount(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<SystemMount> {
        let device = device_of_nearest(path)?;

        if let Some(mount) = volumes.enclosing_mount(path)
            && self.mount_holds(mount, device)
        {
            return Some(mount.clone());
        }

        tracing::debug!(
            "Mount snapshot is stale for {}, re-enumerating",
            path.display()
        );
        let mounts = match self.mounts.enumerate() {
            Ok(mounts) => mounts,
            Err(e) => {
                tracing::warn!("Mount table enumeration failed: {}", e);
                return None;
            }
        };
        let fresh = MountedVolumeSet::from_mounts(mounts, None);
        let mount = fresh
            .mounts()
            .iter()
            .filter(|m| path.starts_with(&m.mountpoint))
            .find(|m| self.mount_holds(m, device))
            .cloned();

        if mount.is_none() {
            tracing::debug!("No mount on the device of {}", path.display());
        }
        mount
    }

    /// `mount` is live and on `device`.
    fn mount_holds(&self, mount: &SystemMount, device: dev_t) -> bool {
        nix::sys::stat::stat(&mount.mountpoint).is_ok_and(|st| st.st_dev == device)
            && self.is_volume(&mount.mountpoint)
    }

    #[cfg(target_os = "linux")]
    fn lookup_details(&self, mount: &SystemMount) -> Result<VolumeDetails> {
        use crate::details::{block_flags, lookup_uuid_in};

        if !mount.fsname.starts_with('/') {
            // Pseudo filesystems (tmpfs, proc, overlay...) have no block device
            return Ok(VolumeDetails::default());
        }
        let device = std::fs::canonicalize(&mount.fsname)
            .with_context(|| format!("Failed to resolve device {}", mount.fsname))?;
        let (is_removable, is_encrypted) = block_flags(&self.class_block_dir, &device);

        Ok(VolumeDetails {
            uuid: lookup_uuid_in(&self.by_uuid_dir, &device)?,
            is_removable,
            is_encrypted,
            roles: Vec::new(),
        })
    }

    #[cfg(target_os = "macos")]
    fn lookup_details(&self, mount: &SystemMount) -> Result<VolumeDetails> {
        use std::process::{Command, Stdio};
        use std::sync::mpsc;

        let child = Command::new("diskutil")
            .arg("info")
            .arg(&mount.mountpoint)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn diskutil")?;
        let child_id = child.id();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        match rx.recv_timeout(self.command_timeout) {
            Ok(output) => {
                let output = output.context("diskutil did not complete")?;
                Ok(crate::details::parse_diskutil_info(&String::from_utf8_lossy(
                    &output.stdout,
                )))
            }
            Err(_) => {
                // SAFETY: plain signal delivery to the child we spawned
                #[allow(unsafe_code)]
                unsafe {
                    libc::kill(i32::try_from(child_id).unwrap_or(-1), libc::SIGKILL);
                }
                anyhow::bail!("diskutil timed out after {:?}", self.command_timeout)
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    #[allow(clippy::unused_self)]
    fn lookup_details(&self, _mount: &SystemMount) -> Result<VolumeDetails> {
        Ok(VolumeDetails::default())
    }
}

/// Device of `path`, or of its nearest existing ancestor.
fn device_of_nearest(path: &Path) -> Option<dev_t> {
    path.ancestors()
        .find_map(|p| nix::sys::stat::stat(p).ok())
        .map(|st| st.st_dev)
}

/// Build a remounting URL for a network mount from its mount record.
pub fn remounting_url_for(mount: &SystemMount) -> Option<String> {
    let fstype = mount.fstype.to_lowercase();
    let source = mount.fsname.as_str();

    match fstype.as_str() {
        "smbfs" | "cifs" | "smb3" => source
            .starts_with("//")
            .then(|| format!("smb:{source}")),
        "afpfs" => source
            .starts_with("//")
            .then(|| format!("afp:{source}")),
        "nfs" | "nfs4" => {
            let (host, export) = source.split_once(':')?;
            let export = export.trim_start_matches('/');
            Some(format!("nfs://{host}/{export}"))
        }
        "webdav" | "davfs" | "fuse.davfs" => {
            (source.starts_with("http://") || source.starts_with("https://"))
                .then(|| source.to_string())
        }
        "fuse.sshfs" | "sshfs" | "macfuse" | "osxfuse" if source.contains(':') => {
            let (host, remote) = source.split_once(':')?;
            let remote = remote.trim_start_matches('/');
            Some(format!("sftp://{host}/{remote}"))
        }
        _ => None,
    }
}

/// Filesystem types that live on another machine.
pub(crate) fn is_network_fstype(fstype: &str) -> bool {
    matches!(
        fstype.to_lowercase().as_str(),
        "smbfs" | "cifs" | "smb3" | "afpfs" | "nfs" | "nfs4" | "webdav" | "davfs" | "fuse.davfs"
            | "fuse.sshfs" | "sshfs" | "ftp"
    )
}

/// Filesystem types served by a FUSE daemon.
pub(crate) fn is_fuse_fstype(fstype: &str) -> bool {
    let fstype = fstype.to_lowercase();
    ["fuse", "fuseblk", "macfuse", "osxfuse", "fusefs"]
        .iter()
        .any(|ft| fstype == *ft || fstype.starts_with(&format!("{ft}.")))
}
