//! Mounted-volume lookup and stable volume identities for filesystem paths.
//!
//! Given any path, this crate answers three questions: which volume holds
//! it, what stable identifier names that volume across remounts, and where
//! the volume's root directory is.
//!
//! # Components
//!
//! ## Mount table
//!
//! - [`MountTable`] - Cached, thread-safe snapshot of the system mount table
//! - [`MountedVolumeSet`] - Immutable snapshot, deepest mount points first
//! - [`MountSource`] - Trait for enumerating mounts ([`SystemMountSource`]
//!   uses `getmntinfo` on BSDs and `/proc/self/mounts` on Linux)
//! - [`VolumeEvent`] / [`VolumeEventSender`] - Mount notifications that mark
//!   the table stale
//!
//! ## Identity
//!
//! - [`VolumeIdentity`] - Non-empty token naming a volume
//! - [`IdentityResolver`] - Ordered chain of [`IdentityStrategy`] layers:
//!   volume UUID, then MD5 of the remounting URL, then MD5 of the path
//! - [`VolumeProbe`] - Filesystem metadata seam ([`SystemProbe`] queries the
//!   live system)
//! - [`VolumeDetails`] - UUID, removable and encryption flags, memoized per
//!   snapshot
//!
//! ## Resolution
//!
//! - [`VolumeResolver`] - Entry point: `identity`, `volume_root`,
//!   `paths_from_volume_root`, `has_full_access`, `filesystem_info`
//! - [`check_full_access`] - Heuristic Full Disk Access detection
//!
//! # Refresh throttling
//!
//! Enumerating mounts is cheap but not free. An unforced
//! [`MountTable::refresh`] reuses a snapshot younger than
//! [`VolumeConfig::refresh_throttle`] (one second by default) unless a
//! [`VolumeEvent`] arrived since. A background watcher posts those events
//! when [`VolumeConfig::watch_for_changes`] is set.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use volid::{VolumeConfig, VolumeResolver};
//!
//! let resolver = VolumeResolver::new(VolumeConfig::default());
//! let photos = Path::new("/Volumes/Backup/Photos/2024");
//!
//! println!("volume {}", resolver.identity(photos));
//! println!("root   {}", resolver.volume_root(photos).display());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod access;
mod climber;
mod config;
mod details;
mod fs_info;
mod identity;
mod mount_source;
mod mount_table;
mod probe;
mod resolver;
mod watcher;

pub use access::{
    AccessReport, FULL_DISK_ACCESS_PROBES, check_full_access, has_full_access_for_current_user,
};
pub use climber::FALLBACK_ROOT_EXTENSION;
pub use config::{
    ConfigError, DEFAULT_COMMAND_TIMEOUT, DEFAULT_FALLBACK_PARENT, DEFAULT_REFRESH_THROTTLE,
    DEFAULT_WATCH_INTERVAL, VolumeConfig,
};
pub use details::VolumeDetails;
pub use fs_info::FileSystemInfo;
pub use identity::{
    IdentityResolver, IdentitySource, IdentityStrategy, PathDigestStrategy, RemountingUrlStrategy,
    ResolveContext, VolumeIdentity, VolumeUuidStrategy, default_strategies, uuid_shaped_md5,
};
pub use mount_source::{EnumerationError, MountSource, SystemMount, SystemMountSource};
pub use mount_table::{MountTable, MountedVolumeSet, VolumeEvent, VolumeEventSender};
pub use probe::{SystemProbe, VolumeProbe, remounting_url_for};
pub use resolver::VolumeResolver;

/// Test doubles for [`MountSource`] and [`VolumeProbe`].
pub mod testing;
