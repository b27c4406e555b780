//! Test doubles for the OS-facing seams.
//!
//! - [`StaticMountSource`]: a mount table you can swap out, counting every
//!   enumeration
//! - [`FakeProbe`]: an in-memory filesystem of volumes, readable paths and
//!   per-path overrides
//!
//! ```
//! use std::path::Path;
//! use volid::testing::{FakeProbe, StaticMountSource};
//! use volid::{VolumeConfig, VolumeResolver};
//!
//! let source = StaticMountSource::new(["/", "/Volumes/Data"]);
//! let probe = FakeProbe::new()
//!     .all_readable()
//!     .volume("/", "ROOT")
//!     .volume("/Volumes/Data", "DATA");
//! let resolver = VolumeResolver::with_parts(source, probe, VolumeConfig::without_watcher());
//!
//! assert_eq!(resolver.identity(Path::new("/Volumes/Data/a/b")), "DATA");
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::details::VolumeDetails;
use crate::mount_source::{EnumerationError, MountSource, SystemMount};
use crate::mount_table::MountedVolumeSet;
use crate::probe::VolumeProbe;

/// An in-memory mount table. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct StaticMountSource {
    mounts: Arc<Mutex<Vec<SystemMount>>>,
    enumerations: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl StaticMountSource {
    /// A source listing the given mount points (as local `apfs` volumes).
    pub fn new<I, P>(mountpoints: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let source = Self::default();
        source.set_mounts(mountpoints);
        source
    }

    /// A source listing full mount records.
    pub fn with_mounts(mounts: Vec<SystemMount>) -> Self {
        let source = Self::default();
        *source.mounts.lock() = mounts;
        source
    }

    /// Replace the listed mount points.
    pub fn set_mounts<I, P>(&self, mountpoints: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        *self.mounts.lock() = mountpoints
            .into_iter()
            .enumerate()
            .map(|(i, p)| SystemMount::new(p, "apfs", format!("/dev/disk{i}s1")))
            .collect();
    }

    /// Make every enumeration fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of enumerations so far.
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl MountSource for StaticMountSource {
    fn enumerate(&self) -> Result<Vec<SystemMount>, EnumerationError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EnumerationError::Syscall {
                call: "getmntinfo",
                errno: nix::errno::Errno::EIO,
            });
        }
        Ok(self.mounts.lock().clone())
    }
}

#[derive(Debug, Clone)]
struct FakeVolume {
    root: PathBuf,
    uuid: Option<String>,
    remounting_url: Option<String>,
    details: VolumeDetails,
}

/// An in-memory [`VolumeProbe`].
///
/// Paths inherit the UUID and remounting URL of the deepest registered
/// volume containing them; [`uuid`](Self::uuid) and
/// [`remounting_url`](Self::remounting_url) override single paths.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    volumes: Vec<FakeVolume>,
    readable: HashSet<PathBuf>,
    existing: HashSet<PathBuf>,
    all_readable: bool,
    uuids: HashMap<PathBuf, String>,
    urls: HashMap<PathBuf, String>,
}

impl FakeProbe {
    /// An empty probe: nothing exists or is readable, nothing has a UUID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat every path as readable.
    #[must_use]
    pub fn all_readable(mut self) -> Self {
        self.all_readable = true;
        self
    }

    /// Mark a path readable (and existing).
    #[must_use]
    pub fn readable(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.existing.insert(path.clone());
        self.readable.insert(path);
        self
    }

    /// Mark a path as existing but unreadable.
    #[must_use]
    pub fn unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.readable.remove(&path);
        self.existing.insert(path);
        self
    }

    /// Register a volume root with a native UUID.
    #[must_use]
    pub fn volume(mut self, root: impl Into<PathBuf>, uuid: impl Into<String>) -> Self {
        self.volumes.push(FakeVolume {
            root: root.into(),
            uuid: Some(uuid.into()),
            remounting_url: None,
            details: VolumeDetails::default(),
        });
        self
    }

    /// Register a network volume root with a remounting URL and no UUID.
    #[must_use]
    pub fn network_volume(mut self, root: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        self.volumes.push(FakeVolume {
            root: root.into(),
            uuid: None,
            remounting_url: Some(url.into()),
            details: VolumeDetails::default(),
        });
        self
    }

    /// Register a volume root with neither UUID nor remounting URL.
    #[must_use]
    pub fn anonymous_volume(mut self, root: impl Into<PathBuf>) -> Self {
        self.volumes.push(FakeVolume {
            root: root.into(),
            uuid: None,
            remounting_url: None,
            details: VolumeDetails::default(),
        });
        self
    }

    /// Override the UUID reported for exactly `path`.
    #[must_use]
    pub fn uuid(mut self, path: impl Into<PathBuf>, uuid: impl Into<String>) -> Self {
        self.uuids.insert(path.into(), uuid.into());
        self
    }

    /// Override the remounting URL reported for exactly `path`.
    #[must_use]
    pub fn remounting_url(mut self, path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        self.urls.insert(path.into(), url.into());
        self
    }

    /// Attach removable, encryption and role details to the volume at
    /// `root`, registering it as anonymous if it isn't known yet.
    #[must_use]
    pub fn with_details(mut self, root: impl Into<PathBuf>, details: VolumeDetails) -> Self {
        let root = root.into();
        if let Some(volume) = self.volumes.iter_mut().find(|v| v.root == root) {
            volume.details = details;
        } else {
            self.volumes.push(FakeVolume {
                root,
                uuid: None,
                remounting_url: None,
                details,
            });
        }
        self
    }

    fn enclosing_volume(&self, path: &Path) -> Option<&FakeVolume> {
        self.volumes
            .iter()
            .filter(|v| path.starts_with(&v.root))
            .max_by_key(|v| v.root.components().count())
    }
}

impl VolumeProbe for FakeProbe {
    fn exists(&self, path: &Path) -> bool {
        self.existing.contains(path) || self.volumes.iter().any(|v| v.root == path)
    }

    fn is_readable(&self, path: &Path) -> bool {
        self.all_readable || self.readable.contains(path)
    }

    fn is_volume(&self, path: &Path) -> bool {
        self.volumes.iter().any(|v| v.root == path)
    }

    fn volume_uuid(&self, path: &Path, _volumes: &MountedVolumeSet) -> Option<String> {
        if let Some(uuid) = self.uuids.get(path) {
            return Some(uuid.clone());
        }
        self.enclosing_volume(path)?.uuid.clone()
    }

    fn remounting_url(&self, path: &Path, _volumes: &MountedVolumeSet) -> Option<String> {
        if let Some(url) = self.urls.get(path) {
            return Some(url.clone());
        }
        self.enclosing_volume(path)?.remounting_url.clone()
    }

    fn volume_details(&self, path: &Path, volumes: &MountedVolumeSet) -> Option<VolumeDetails> {
        let volume = self.enclosing_volume(path)?;
        Some(VolumeDetails {
            uuid: self.volume_uuid(path, volumes),
            ..volume.details.clone()
        })
    }
}
