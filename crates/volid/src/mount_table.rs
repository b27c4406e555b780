//! Rate-limited cache of the mounted volume list.
//!
//! Enumerating the mount table is cheap but not free, and identity resolution
//! consults it at every step of a path climb. [`MountTable`] keeps the last
//! snapshot and re-enumerates at most once per throttle window unless the
//! caller forces it or a [`VolumeEvent`] arrived since the last refresh.
//!
//! # Invalidation
//!
//! Mount and unmount notifications are delivered as messages on a channel
//! owned by the table. The receiving end is drained under the same lock that
//! guards the snapshot, so a notification can never interleave with a
//! half-finished refresh.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::VolumeConfig;
use crate::details::VolumeDetails;
use crate::mount_source::{MountSource, SystemMount, SystemMountSource};
use crate::watcher::MountWatcher;

/// A notification that the set of mounted volumes changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeEvent {
    /// A volume was mounted at the given path
    Mounted(PathBuf),
    /// The volume at the given path was unmounted
    Unmounted(PathBuf),
    /// The mount table changed but the source can't say how
    Changed,
}

/// An immutable snapshot of the mounted volumes.
///
/// Entries are sorted in descending lexicographic order, so a nested mount
/// point (`/Volumes/Data/Inner`) always precedes its parent (`/Volumes/Data`)
/// and the first prefix match is the deepest one.
///
/// Volume details looked up while the snapshot is current are memoized with
/// it and dropped on the next refresh.
#[derive(Debug, Default)]
pub struct MountedVolumeSet {
    entries: Vec<String>,
    mounts: Vec<SystemMount>,
    refreshed_at: Option<Instant>,
    details: Mutex<HashMap<(PathBuf, String), Option<VolumeDetails>>>,
}

impl MountedVolumeSet {
    /// Build a snapshot from enumerated mounts.
    pub fn from_mounts(mut mounts: Vec<SystemMount>, refreshed_at: Option<Instant>) -> Self {
        // Later entries shadow earlier ones on the same mount point
        mounts.reverse();
        mounts.sort_by(|a, b| b.mountpoint.as_os_str().cmp(a.mountpoint.as_os_str()));
        mounts.dedup_by(|a, b| a.mountpoint == b.mountpoint);
        let entries = mounts
            .iter()
            .map(|m| m.mountpoint.to_string_lossy().into_owned())
            .collect();

        Self {
            entries,
            mounts,
            refreshed_at,
            details: Mutex::new(HashMap::new()),
        }
    }

    /// Mount point paths, most specific first.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Full mount records, in the same order as [`entries`](Self::entries).
    pub fn mounts(&self) -> &[SystemMount] {
        &self.mounts
    }

    /// When this snapshot was taken; `None` for the initial empty set.
    pub fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }

    /// Number of mounted volumes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no volumes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` is exactly one of the mount points.
    pub fn contains(&self, path: &Path) -> bool {
        self.mounts.iter().any(|m| m.mountpoint == path)
    }

    /// The deepest mount whose mount point contains `path`.
    pub fn enclosing_mount(&self, path: &Path) -> Option<&SystemMount> {
        self.mounts.iter().find(|m| path.starts_with(&m.mountpoint))
    }

    /// Details of `mount`, running `lookup` only the first time it is asked
    /// for on this snapshot. Failed lookups (`None`) are remembered too.
    pub fn memoize_details(
        &self,
        mount: &SystemMount,
        lookup: impl FnOnce() -> Option<VolumeDetails>,
    ) -> Option<VolumeDetails> {
        let key = (mount.mountpoint.clone(), mount.fsname.clone());
        self.details.lock().entry(key).or_insert_with(lookup).clone()
    }
}

/// Posts [`VolumeEvent`]s into a [`MountTable`].
#[derive(Debug, Clone)]
pub struct VolumeEventSender {
    tx: Sender<VolumeEvent>,
}

impl VolumeEventSender {
    /// Deliver an event. Returns `false` once the table has been dropped.
    pub fn send(&self, event: VolumeEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

struct TableState {
    volumes: Arc<MountedVolumeSet>,
    /// `None` is the distant past: the next refresh always enumerates.
    last_refreshed: Option<Instant>,
    events: Receiver<VolumeEvent>,
}

/// Cached, thread-safe view of the mount table.
pub struct MountTable<S: MountSource = SystemMountSource> {
    source: Arc<S>,
    config: VolumeConfig,
    state: Mutex<TableState>,
    events_tx: Sender<VolumeEvent>,
    watcher: OnceLock<MountWatcher>,
    stopped: Arc<AtomicBool>,
}

impl MountTable<SystemMountSource> {
    /// A table over the live system mount table.
    pub fn system(config: VolumeConfig) -> Self {
        Self::new(SystemMountSource, config)
    }
}

impl<S: MountSource + 'static> MountTable<S> {
    /// Create an empty table; nothing is enumerated until the first refresh.
    pub fn new(source: S, config: VolumeConfig) -> Self {
        let (events_tx, events) = mpsc::channel();
        Self {
            source: Arc::new(source),
            config,
            state: Mutex::new(TableState {
                volumes: Arc::new(MountedVolumeSet::default()),
                last_refreshed: None,
                events,
            }),
            events_tx,
            watcher: OnceLock::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Refresh the snapshot unless it is fresh enough.
    ///
    /// With `force == false`, a snapshot taken less than the throttle window
    /// ago is returned as-is. Pending volume events always force a refresh.
    pub fn refresh(&self, force: bool) -> Arc<MountedVolumeSet> {
        self.refresh_at(force, Instant::now())
    }

    /// [`refresh`](Self::refresh) with an explicit clock.
    pub fn refresh_at(&self, force: bool, now: Instant) -> Arc<MountedVolumeSet> {
        if self.config.watch_for_changes {
            self.ensure_watching();
        }

        let mut state = self.state.lock();
        Self::drain_events(&mut state);

        if !force
            && let Some(last) = state.last_refreshed
            && now.saturating_duration_since(last) < self.config.refresh_throttle
        {
            tracing::trace!("Mount table cache hit ({} volumes)", state.volumes.len());
            return Arc::clone(&state.volumes);
        }

        let mounts = match self.source.enumerate() {
            Ok(mounts) => mounts,
            Err(e) => {
                tracing::warn!("Mount table enumeration failed: {}", e);
                Vec::new()
            }
        };
        let volumes = Arc::new(MountedVolumeSet::from_mounts(mounts, Some(now)));
        tracing::debug!("Mount table refreshed: {} volumes", volumes.len());

        state.volumes = Arc::clone(&volumes);
        state.last_refreshed = Some(now);
        volumes
    }

    /// The current snapshot, without refreshing.
    pub fn cached(&self) -> Arc<MountedVolumeSet> {
        Arc::clone(&self.state.lock().volumes)
    }

    /// Whether `path` is a mount point in the current snapshot.
    pub fn is_mounted_volume(&self, path: &Path) -> bool {
        self.state.lock().volumes.contains(path)
    }

    /// Mark the snapshot stale so the next refresh re-enumerates.
    pub fn invalidate(&self) {
        self.state.lock().last_refreshed = None;
    }

    /// A handle for posting mount/unmount notifications into this table.
    pub fn event_sender(&self) -> VolumeEventSender {
        VolumeEventSender {
            tx: self.events_tx.clone(),
        }
    }

    /// The table's configuration.
    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Start the background watcher. Idempotent.
    pub fn ensure_watching(&self) {
        self.watcher.get_or_init(|| {
            MountWatcher::spawn(
                Arc::clone(&self.source),
                self.event_sender(),
                self.config.watch_interval,
                Arc::clone(&self.stopped),
            )
        });
    }

    fn drain_events(state: &mut TableState) {
        let mut stale = false;
        while let Ok(event) = state.events.try_recv() {
            tracing::info!("Volume event: {:?}", event);
            stale = true;
        }
        if stale {
            state.last_refreshed = None;
        }
    }
}

impl<S: MountSource> Drop for MountTable<S> {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl<S: MountSource> std::fmt::Debug for MountTable<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MountTable")
            .field("volumes", &state.volumes.len())
            .field("last_refreshed", &state.last_refreshed)
            .field("watching", &self.watcher.get().is_some())
            .finish_non_exhaustive()
    }
}
