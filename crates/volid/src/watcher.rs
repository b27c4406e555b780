//! Background detection of mount and unmount events.
//!
//! The watcher re-enumerates the mount table whenever it may have changed and
//! posts the difference to the owning [`MountTable`](crate::MountTable) as
//! [`VolumeEvent`]s. On Linux it sleeps in `poll(2)` on `/proc/self/mounts`,
//! which the kernel marks with `POLLPRI` when the mount namespace changes. On
//! other platforms it polls at the configured interval.
//!
//! The thread exits when the table is dropped.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::mount_source::MountSource;
use crate::mount_table::{VolumeEvent, VolumeEventSender};

/// Handle to a running watcher thread.
#[derive(Debug)]
pub(crate) struct MountWatcher {
    _thread: Option<JoinHandle<()>>,
}

impl MountWatcher {
    pub(crate) fn spawn<S: MountSource + 'static>(
        source: Arc<S>,
        events: VolumeEventSender,
        interval: Duration,
        stopped: Arc<AtomicBool>,
    ) -> Self {
        let thread = std::thread::Builder::new()
            .name("volid-mount-watcher".to_string())
            .spawn(move || watch_loop(&*source, &events, interval, &stopped));

        match thread {
            Ok(handle) => {
                tracing::debug!("Mount watcher started (interval {:?})", interval);
                Self {
                    _thread: Some(handle),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to start mount watcher: {}", e);
                Self { _thread: None }
            }
        }
    }
}

fn watch_loop<S: MountSource>(
    source: &S,
    events: &VolumeEventSender,
    interval: Duration,
    stopped: &AtomicBool,
) {
    let mut known = snapshot(source);
    let mut waiter = ChangeWaiter::new();

    while !stopped.load(Ordering::Acquire) {
        waiter.wait(interval);
        if stopped.load(Ordering::Acquire) {
            break;
        }

        let Some(current) = snapshot(source) else {
            continue;
        };
        let Some(previous) = known.as_ref() else {
            known = Some(current);
            continue;
        };

        let diff = diff_mounts(previous, &current);
        for event in diff {
            if !events.send(event) {
                tracing::debug!("Mount table dropped, stopping watcher");
                return;
            }
        }
        known = Some(current);
    }

    tracing::debug!("Mount watcher stopped");
}

fn snapshot<S: MountSource>(source: &S) -> Option<BTreeSet<PathBuf>> {
    match source.enumerate() {
        Ok(mounts) => Some(mounts.into_iter().map(|m| m.mountpoint).collect()),
        Err(e) => {
            tracing::debug!("Mount watcher enumeration failed: {}", e);
            None
        }
    }
}

/// Events turning `previous` into `current`: unmounts first, then mounts.
pub(crate) fn diff_mounts(
    previous: &BTreeSet<PathBuf>,
    current: &BTreeSet<PathBuf>,
) -> Vec<VolumeEvent> {
    previous
        .difference(current)
        .cloned()
        .map(VolumeEvent::Unmounted)
        .chain(current.difference(previous).cloned().map(VolumeEvent::Mounted))
        .collect()
}

/// Blocks until the mount table may have changed or the interval elapses.
struct ChangeWaiter {
    #[cfg(target_os = "linux")]
    mounts: Option<std::fs::File>,
}

impl ChangeWaiter {
    fn new() -> Self {
        #[cfg(target_os = "linux")]
        {
            let mounts = match std::fs::File::open(crate::mount_source::PROC_MOUNTS) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::debug!("Cannot poll mount table, falling back to interval: {}", e);
                    None
                }
            };
            Self { mounts }
        }

        #[cfg(not(target_os = "linux"))]
        {
            Self {}
        }
    }

    #[cfg(target_os = "linux")]
    fn wait(&mut self, interval: Duration) {
        use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
        use std::os::fd::AsFd;

        let Some(file) = self.mounts.as_ref() else {
            std::thread::sleep(interval);
            return;
        };

        let millis = u16::try_from(interval.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLPRI)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => {}
            Ok(_) => tracing::trace!("Mount table change signalled"),
            Err(e) => {
                tracing::debug!("poll on mount table failed: {}", e);
                std::thread::sleep(interval);
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    #[allow(clippy::unused_self)]
    fn wait(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}
