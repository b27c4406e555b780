//! Heuristic detection of a "Full Disk Access" grant.
//!
//! macOS hides a set of per-user directories from processes without the
//! grant. We try to read each of them under the home directory; paths that
//! don't exist are ignored, so a fresh account with no Mail or Messages data
//! still reports full access.

use std::path::{Path, PathBuf};

use crate::mount_source::MountSource;
use crate::probe::{SystemProbe, VolumeProbe};
use crate::resolver::VolumeResolver;

/// Protected paths, relative to the home directory.
pub const FULL_DISK_ACCESS_PROBES: [&str; 23] = [
    "Library/Application Support/AddressBook",
    "Library/Application Support/CallHistoryDB",
    "Library/Application Support/CallHistoryTransactions",
    "Library/Application Support/com.apple.TCC",
    "Pictures/Photos Library.photoslibrary",
    "Library/Application Support/MobileSync",
    "Library/Calendars",
    "Library/Caches/CloudKit/com.apple.Safari",
    "Library/Containers/com.apple.iChat",
    "Library/Containers/com.apple.mail",
    "Library/Caches/com.apple.Safari",
    "Library/Caches/com.apple.safaridavclient",
    "Library/Containers/com.apple.Safari",
    "Library/Cookies",
    "Library/IdentityServices",
    "Library/HomeKit",
    "Library/Mail",
    "Library/Messages",
    "Library/Metadata/com.apple.IntelligentSuggestions",
    "Library/Metadata/CoreSpotlight",
    "Library/PersonalizationPortrait",
    "Library/Safari",
    "Library/Suggestions",
];

const LOGGED_INACCESSIBLE: usize = 5;

/// Outcome of probing a home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessReport {
    /// The probed home directory
    pub home: PathBuf,
    /// Probe paths that exist
    pub probed: Vec<PathBuf>,
    /// Probe paths that don't exist
    pub missing: Vec<PathBuf>,
    /// Existing probe paths we can't read
    pub inaccessible: Vec<PathBuf>,
}

impl AccessReport {
    /// True when every existing probe path is readable.
    pub fn has_full_access(&self) -> bool {
        self.inaccessible.is_empty()
    }
}

/// Probe every path in [`FULL_DISK_ACCESS_PROBES`] under `home`.
pub fn check_full_access(home: &Path, probe: &dyn VolumeProbe) -> AccessReport {
    let mut report = AccessReport {
        home: home.to_path_buf(),
        probed: Vec::new(),
        missing: Vec::new(),
        inaccessible: Vec::new(),
    };

    for relative in FULL_DISK_ACCESS_PROBES {
        let path = home.join(relative);
        if !probe.exists(&path) {
            report.missing.push(path);
            continue;
        }
        if !probe.is_readable(&path) {
            report.inaccessible.push(path.clone());
        }
        report.probed.push(path);
    }

    tracing::info!(
        "Full disk access for {}: {} ({} of {} probe paths present)",
        home.display(),
        report.has_full_access(),
        report.probed.len(),
        FULL_DISK_ACCESS_PROBES.len()
    );
    if !report.inaccessible.is_empty() {
        let shown: Vec<_> = report
            .inaccessible
            .iter()
            .take(LOGGED_INACCESSIBLE)
            .map(|p| p.display().to_string())
            .collect();
        tracing::info!("Inaccessible: {}", shown.join(", "));
    }

    report
}

/// Probe the current user's home directory on the live filesystem.
///
/// Returns `None` when no home directory can be determined.
pub fn has_full_access_for_current_user() -> Option<bool> {
    let dirs = directories::BaseDirs::new()?;
    Some(check_full_access(dirs.home_dir(), &SystemProbe::default()).has_full_access())
}

impl<S: MountSource + 'static, P: VolumeProbe> VolumeResolver<S, P> {
    /// Whether every existing protected path under `home` is readable.
    pub fn has_full_access(&self, home: &Path) -> bool {
        self.check_full_access(home).has_full_access()
    }

    /// The full probe report for `home`.
    pub fn check_full_access(&self, home: &Path) -> AccessReport {
        check_full_access(home, &self.probe)
    }
}
