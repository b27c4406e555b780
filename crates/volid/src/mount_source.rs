//! Enumeration of the system mount table.
//!
//! [`MountSource`] is the seam between the cached [`MountTable`](crate::MountTable)
//! and the operating system. [`SystemMountSource`] reads the live table:
//!
//! - **macOS / FreeBSD**: `getmntinfo(3)` with `MNT_NOWAIT`
//! - **Linux**: `/proc/self/mounts`
//!
//! Enumeration never blocks on an unresponsive network mount because neither
//! call touches the mounted filesystems themselves.

use std::path::PathBuf;

/// Information about a single mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMount {
    /// The mount point path (e.g., `/Volumes/Backup`)
    pub mountpoint: PathBuf,
    /// The filesystem type (e.g., `apfs`, `ext4`, `smbfs`)
    pub fstype: String,
    /// The filesystem name / device (e.g., `/dev/disk3s1`, `//me@nas/share`)
    pub fsname: String,
}

impl SystemMount {
    /// Create a mount record.
    pub fn new(
        mountpoint: impl Into<PathBuf>,
        fstype: impl Into<String>,
        fsname: impl Into<String>,
    ) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            fstype: fstype.into(),
            fsname: fsname.into(),
        }
    }
}

/// Errors from enumerating the mount table.
///
/// These never reach callers of the resolver: the mount table logs them and
/// falls back to an empty snapshot.
#[derive(Debug, thiserror::Error)]
pub enum EnumerationError {
    /// Reading the mount table file failed
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that could not be read
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// The enumeration syscall reported an error
    #[error("{call} failed: {errno}")]
    Syscall {
        /// The failing call
        call: &'static str,
        /// The errno reported
        errno: nix::errno::Errno,
    },

    /// No mount enumeration exists for this platform
    #[error("mount enumeration is not supported on this platform")]
    Unsupported,
}

/// A provider of the current list of mounted filesystems.
pub trait MountSource: Send + Sync {
    /// Enumerate every mounted filesystem.
    fn enumerate(&self) -> Result<Vec<SystemMount>, EnumerationError>;
}

impl<T: MountSource + ?Sized> MountSource for std::sync::Arc<T> {
    fn enumerate(&self) -> Result<Vec<SystemMount>, EnumerationError> {
        (**self).enumerate()
    }
}

/// Reads the live system mount table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMountSource;

impl MountSource for SystemMountSource {
    fn enumerate(&self) -> Result<Vec<SystemMount>, EnumerationError> {
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        {
            enumerate_getmntinfo()
        }

        #[cfg(target_os = "linux")]
        {
            enumerate_proc_mounts()
        }

        #[cfg(not(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "linux"
        )))]
        {
            Err(EnumerationError::Unsupported)
        }
    }
}

// ============================================================================
// Platform-specific implementations
// ============================================================================

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn enumerate_getmntinfo() -> Result<Vec<SystemMount>, EnumerationError> {
    let mut buf: *mut libc::statfs = std::ptr::null_mut();

    // SAFETY: getmntinfo stores a pointer to a buffer it owns (reused across
    // calls on the same thread) and returns the number of entries in it.
    #[allow(unsafe_code)]
    let count = unsafe { libc::getmntinfo(&raw mut buf, libc::MNT_NOWAIT) };
    if count <= 0 || buf.is_null() {
        return Err(EnumerationError::Syscall {
            call: "getmntinfo",
            errno: nix::errno::Errno::last(),
        });
    }

    #[allow(clippy::cast_sign_loss)]
    let len = count as usize;
    // SAFETY: count > 0 and buf is non-null, so buf points at `len` statfs entries.
    #[allow(unsafe_code)]
    let entries = unsafe { std::slice::from_raw_parts(buf, len) };

    Ok(entries
        .iter()
        .map(|entry| SystemMount {
            mountpoint: PathBuf::from(c_chars_to_string(&entry.f_mntonname)),
            fstype: c_chars_to_string(&entry.f_fstypename),
            fsname: c_chars_to_string(&entry.f_mntfromname),
        })
        .collect())
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn c_chars_to_string(chars: &[libc::c_char]) -> String {
    #[allow(clippy::cast_sign_loss)]
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Location of the per-process mount table on Linux.
#[cfg(target_os = "linux")]
pub(crate) const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Parse Linux /proc/self/mounts.
///
/// Format: `{device} {mountpoint} {fstype} {options} {dump} {pass}`
/// Example: `/dev/nvme0n1p2 /home ext4 rw,relatime 0 0`
#[cfg(target_os = "linux")]
fn enumerate_proc_mounts() -> Result<Vec<SystemMount>, EnumerationError> {
    let contents = std::fs::read_to_string(PROC_MOUNTS).map_err(|source| EnumerationError::Io {
        path: PathBuf::from(PROC_MOUNTS),
        source,
    })?;

    Ok(contents.lines().filter_map(parse_proc_mounts_line).collect())
}

#[cfg(any(target_os = "linux", test))]
pub(crate) fn parse_proc_mounts_line(line: &str) -> Option<SystemMount> {
    let mut parts = line.split_whitespace();
    let fsname = unescape_mount_field(parts.next()?);
    let mountpoint = unescape_mount_field(parts.next()?);
    let fstype = parts.next()?.to_string();

    Some(SystemMount {
        mountpoint: PathBuf::from(mountpoint),
        fstype,
        fsname,
    })
}

/// Unescape octal sequences used by /proc/mounts.
///
/// - `\040` = space
/// - `\011` = tab
/// - `\012` = newline
/// - `\134` = backslash
#[cfg(any(target_os = "linux", test))]
fn unescape_mount_field(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && is_octal_escape(&bytes[i + 1..]) {
            let code = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(any(target_os = "linux", test))]
fn is_octal_escape(rest: &[u8]) -> bool {
    rest.len() >= 3 && rest[0] <= b'3' && rest[..3].iter().all(|b| (b'0'..=b'7').contains(b))
}
