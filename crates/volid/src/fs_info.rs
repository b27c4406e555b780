//! Filesystem details of a mount.

use std::path::PathBuf;

use crate::details::VolumeDetails;
use crate::mount_source::SystemMount;
use crate::probe::{is_fuse_fstype, is_network_fstype};

/// What kind of filesystem a path lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemInfo {
    /// Mount point of the filesystem
    pub mount_point: PathBuf,
    /// Filesystem type, lowercased (`apfs`, `ext4`, `smbfs`...)
    pub fs_type: String,
    /// Device or remote source
    pub fs_name: String,
    /// Served from another machine
    pub is_network: bool,
    /// Served by a FUSE daemon
    pub is_fuse: bool,
    /// On removable media
    pub is_removable: bool,
    /// Encrypted at rest (FileVault, dm-crypt)
    pub is_encrypted: bool,
    /// APFS volume roles; empty on other filesystems
    pub roles: Vec<String>,
}

impl FileSystemInfo {
    /// Describe a mount record.
    pub fn from_mount(mount: &SystemMount) -> Self {
        Self {
            mount_point: mount.mountpoint.clone(),
            fs_type: mount.fstype.to_lowercase(),
            fs_name: mount.fsname.clone(),
            is_network: is_network_fstype(&mount.fstype),
            is_fuse: is_fuse_fstype(&mount.fstype),
            is_removable: false,
            is_encrypted: false,
            roles: Vec::new(),
        }
    }

    /// Fill in the removable, encryption and role flags.
    #[must_use]
    pub fn with_details(mut self, details: &VolumeDetails) -> Self {
        self.is_removable = details.is_removable;
        self.is_encrypted = details.is_encrypted;
        self.roles.clone_from(&details.roles);
        self
    }

    /// Whether the filesystem is on a locally attached device.
    pub fn is_local(&self) -> bool {
        !self.is_network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mount_local() {
        let info = FileSystemInfo::from_mount(&SystemMount::new("/", "APFS", "/dev/disk1s1"));
        assert_eq!(info.fs_type, "apfs");
        assert!(info.is_local());
        assert!(!info.is_fuse);
    }

    #[test]
    fn test_from_mount_sshfs() {
        let info =
            FileSystemInfo::from_mount(&SystemMount::new("/mnt/r", "fuse.sshfs", "me@host:/srv"));
        assert!(info.is_network);
        assert!(info.is_fuse);
    }

    #[test]
    fn test_with_details() {
        let info = FileSystemInfo::from_mount(&SystemMount::new("/", "apfs", "/dev/disk3s5"));
        assert!(!info.is_removable && !info.is_encrypted && info.roles.is_empty());

        let info = info.with_details(&VolumeDetails {
            uuid: Some("X".to_string()),
            is_removable: false,
            is_encrypted: true,
            roles: vec!["Data".to_string()],
        });
        assert!(info.is_encrypted);
        assert!(!info.is_removable);
        assert_eq!(info.roles, vec!["Data".to_string()]);
    }
}
