//! Per-volume details that stay fixed while a volume is mounted.
//!
//! - **Linux**: the UUID comes from the `/dev/disk/by-uuid` symlinks; the
//!   removable and dm-crypt flags from `/sys/class/block`, following
//!   `slaves/` down through device-mapper stacks.
//! - **macOS**: one `diskutil info` call per volume, parsed by
//!   [`parse_diskutil_info`].
//!
//! Lookups go through [`MountedVolumeSet::memoize_details`](crate::MountedVolumeSet::memoize_details),
//! so each volume is queried at most once per mount table snapshot.

#[cfg(target_os = "linux")]
use std::path::Path;

#[cfg(target_os = "linux")]
use anyhow::{Context, Result};

/// Hardware and encryption details of a mounted volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeDetails {
    /// Native volume UUID
    pub uuid: Option<String>,
    /// The backing device is removable media
    pub is_removable: bool,
    /// The volume is encrypted (FileVault, dm-crypt)
    pub is_encrypted: bool,
    /// APFS volume roles (`System`, `Data`...); empty elsewhere
    pub roles: Vec<String>,
}

/// Find the entry of a `by-uuid` directory that links to `device`.
///
/// `device` must already be canonical.
#[cfg(target_os = "linux")]
pub(crate) fn lookup_uuid_in(by_uuid: &Path, device: &Path) -> Result<Option<String>> {
    let entries = match std::fs::read_dir(by_uuid) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to list {}", by_uuid.display()));
        }
    };

    for entry in entries.map_while(std::result::Result::ok) {
        if std::fs::canonicalize(entry.path()).is_ok_and(|target| target == device) {
            return Ok(Some(entry.file_name().to_string_lossy().into_owned()));
        }
    }
    Ok(None)
}

/// Device-mapper nesting we follow before giving up (LVM on LUKS is two).
#[cfg(target_os = "linux")]
const MAX_SLAVE_DEPTH: usize = 4;

/// `(removable, encrypted)` for a canonical block device path such as
/// `/dev/sda1` or `/dev/dm-0`.
#[cfg(target_os = "linux")]
pub(crate) fn block_flags(class_block: &Path, device: &Path) -> (bool, bool) {
    match device.file_name() {
        Some(name) => block_flags_of(&class_block.join(name), 0),
        None => (false, false),
    }
}

#[cfg(target_os = "linux")]
fn block_flags_of(entry: &Path, depth: usize) -> (bool, bool) {
    let Ok(sys) = std::fs::canonicalize(entry) else {
        return (false, false);
    };
    // Partitions carry `removable` on the whole disk
    let disk = if sys.join("partition").exists() {
        sys.parent().unwrap_or(sys.as_path())
    } else {
        sys.as_path()
    };

    let mut removable = read_trimmed(&disk.join("removable")).is_some_and(|v| v == "1");
    let mut encrypted =
        read_trimmed(&sys.join("dm").join("uuid")).is_some_and(|v| v.starts_with("CRYPT-"));

    if depth < MAX_SLAVE_DEPTH
        && let Ok(slaves) = std::fs::read_dir(sys.join("slaves"))
    {
        for slave in slaves.map_while(std::result::Result::ok) {
            let (r, e) = block_flags_of(&slave.path(), depth + 1);
            removable |= r;
            encrypted |= e;
        }
    }
    (removable, encrypted)
}

#[cfg(target_os = "linux")]
fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Parse the output of `diskutil info <volume>`.
///
/// ```text
///    Volume UUID:               0A81F3B1-51D9-3335-B3E3-169C3640360D
///    Removable Media:           Fixed
///    FileVault:                 Yes
///    APFS Volume Roles:         Data
/// ```
#[cfg(any(target_os = "macos", test))]
pub(crate) fn parse_diskutil_info(output: &str) -> VolumeDetails {
    let mut details = VolumeDetails::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match key {
            "Volume UUID" if !value.is_empty() => details.uuid = Some(value.to_string()),
            "Removable Media" => details.is_removable = value == "Removable",
            "FileVault" | "Encrypted" => details.is_encrypted |= value.starts_with("Yes"),
            _ if key.starts_with("APFS Volume Role") => {
                details.roles = value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|role| !role.is_empty() && !role.starts_with('(') && *role != "None")
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKUTIL_DATA: &str = "   Device Identifier:         disk3s5
   Device Node:               /dev/disk3s5
   Volume Name:               Data
   Mount Point:               /System/Volumes/Data
   Volume UUID:               0A81F3B1-51D9-3335-B3E3-169C3640360D
   Disk / Partition UUID:     0A81F3B1-51D9-3335-B3E3-169C3640360D
   Removable Media:           Fixed
   APFS Volume Roles:         Data
   FileVault:                 Yes
   Encrypted:                 Yes
";

    const DISKUTIL_STICK: &str = "   Device Identifier:         disk5s1
   Volume Name:               STICK
   Mount Point:               /Volumes/STICK
   Volume UUID:               5C2E1B7A-0D1E-3F4A-9B8C-7D6E5F4A3B2C
   Removable Media:           Removable
   Encrypted:                 No
";

    #[test]
    fn test_parse_diskutil_internal_data_volume() {
        let details = parse_diskutil_info(DISKUTIL_DATA);

        assert_eq!(
            details.uuid.as_deref(),
            Some("0A81F3B1-51D9-3335-B3E3-169C3640360D")
        );
        assert!(!details.is_removable);
        assert!(details.is_encrypted);
        assert_eq!(details.roles, vec!["Data".to_string()]);
    }

    #[test]
    fn test_parse_diskutil_usb_stick() {
        let details = parse_diskutil_info(DISKUTIL_STICK);

        assert!(details.is_removable);
        assert!(!details.is_encrypted);
        assert!(details.roles.is_empty());
    }

    #[test]
    fn test_parse_diskutil_multiple_roles() {
        let details = parse_diskutil_info("   APFS Volume Roles:   System, Backup\n");
        assert_eq!(details.roles, vec!["System".to_string(), "Backup".to_string()]);
        assert!(parse_diskutil_info("   APFS Volume Roles:   (None)\n").roles.is_empty());
    }

    #[test]
    fn test_parse_diskutil_without_uuid() {
        assert_eq!(parse_diskutil_info("Volume Name: x\n"), VolumeDetails::default());
    }

    #[cfg(target_os = "linux")]
    mod sysfs {
        use super::super::*;
        use std::os::unix::fs::symlink;
        use std::path::{Path, PathBuf};
        use tempfile::TempDir;

        /// A fake `/sys` with `class/block` symlinks into `devices/`.
        struct SysFixture {
            temp: TempDir,
        }

        impl SysFixture {
            fn new() -> Self {
                let temp = TempDir::new().unwrap();
                std::fs::create_dir_all(temp.path().join("class/block")).unwrap();
                std::fs::create_dir_all(temp.path().join("devices")).unwrap();
                Self { temp }
            }

            fn class_block(&self) -> PathBuf {
                self.temp.path().join("class/block")
            }

            fn disk(&self, name: &str, removable: bool) -> PathBuf {
                let dir = self.temp.path().join("devices").join(name);
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join("removable"), if removable { "1\n" } else { "0\n" })
                    .unwrap();
                symlink(&dir, self.class_block().join(name)).unwrap();
                dir
            }

            fn partition(&self, disk: &Path, name: &str) -> PathBuf {
                let dir = disk.join(name);
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join("partition"), "1\n").unwrap();
                symlink(&dir, self.class_block().join(name)).unwrap();
                dir
            }

            fn mapper(&self, name: &str, dm_uuid: &str, slaves: &[&Path]) -> PathBuf {
                let dir = self.disk(name, false);
                std::fs::create_dir_all(dir.join("dm")).unwrap();
                std::fs::write(dir.join("dm/uuid"), format!("{dm_uuid}\n")).unwrap();
                std::fs::create_dir_all(dir.join("slaves")).unwrap();
                for slave in slaves {
                    symlink(slave, dir.join("slaves").join(slave.file_name().unwrap())).unwrap();
                }
                dir
            }
        }

        #[test]
        fn test_removable_partition_inherits_disk_flag() {
            let sys = SysFixture::new();
            let sdb = sys.disk("sdb", true);
            sys.partition(&sdb, "sdb1");
            let sda = sys.disk("sda", false);
            sys.partition(&sda, "sda1");

            assert_eq!(block_flags(&sys.class_block(), Path::new("/dev/sdb1")), (true, false));
            assert_eq!(block_flags(&sys.class_block(), Path::new("/dev/sda1")), (false, false));
        }

        #[test]
        fn test_dm_crypt_is_encrypted() {
            let sys = SysFixture::new();
            let sda = sys.disk("sda", false);
            let sda2 = sys.partition(&sda, "sda2");
            sys.mapper("dm-0", "CRYPT-LUKS2-4f1c2d3e-luks-root", &[&sda2]);

            assert_eq!(block_flags(&sys.class_block(), Path::new("/dev/dm-0")), (false, true));
        }

        #[test]
        fn test_lvm_on_luks_is_encrypted() {
            let sys = SysFixture::new();
            let sda = sys.disk("sda", false);
            let sda2 = sys.partition(&sda, "sda2");
            let crypt = sys.mapper("dm-0", "CRYPT-LUKS2-4f1c2d3e-luks", &[&sda2]);
            sys.mapper("dm-1", "LVM-Xy12", &[&crypt]);

            assert_eq!(block_flags(&sys.class_block(), Path::new("/dev/dm-1")), (false, true));
        }

        #[test]
        fn test_unknown_device_has_no_flags() {
            let sys = SysFixture::new();
            assert_eq!(block_flags(&sys.class_block(), Path::new("/dev/nvme9n1")), (false, false));
        }

        #[test]
        fn test_lookup_uuid_in_matches_symlink() {
            let temp = TempDir::new().unwrap();
            let device = temp.path().join("sda1");
            std::fs::write(&device, "").unwrap();
            let by_uuid = temp.path().join("by-uuid");
            std::fs::create_dir(&by_uuid).unwrap();
            symlink(&device, by_uuid.join("1234-ABCD")).unwrap();
            symlink(temp.path().join("other"), by_uuid.join("dangling")).unwrap();

            let device = std::fs::canonicalize(&device).unwrap();
            let uuid = lookup_uuid_in(&by_uuid, &device).unwrap();
            assert_eq!(uuid, Some("1234-ABCD".to_string()));
        }

        #[test]
        fn test_lookup_uuid_in_missing_directory() {
            let temp = TempDir::new().unwrap();
            let uuid = lookup_uuid_in(&temp.path().join("absent"), Path::new("/dev/sda1")).unwrap();
            assert_eq!(uuid, None);
        }
    }
}
