//! The public entry point tying the mount table, probe and identity chain
//! together.
//!
//! Path climbing lives in [`crate::climber`] and the access check in
//! [`crate::access`]; both are exposed as methods on [`VolumeResolver`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::VolumeConfig;
use crate::fs_info::FileSystemInfo;
use crate::identity::{IdentityResolver, IdentityStrategy, VolumeIdentity};
use crate::mount_source::{MountSource, SystemMountSource};
use crate::mount_table::{MountTable, MountedVolumeSet};
use crate::probe::{SystemProbe, VolumeProbe};

/// Resolves paths to volumes, volume identities and volume roots.
///
/// Owns (a shared handle to) the [`MountTable`]; several resolvers may share
/// one table through [`with_table`](Self::with_table).
pub struct VolumeResolver<S: MountSource = SystemMountSource, P: VolumeProbe = SystemProbe> {
    pub(crate) table: Arc<MountTable<S>>,
    pub(crate) probe: P,
    pub(crate) identities: IdentityResolver,
    pub(crate) config: VolumeConfig,
}

impl VolumeResolver<SystemMountSource, SystemProbe> {
    /// A resolver over the live system.
    pub fn new(config: VolumeConfig) -> Self {
        let probe = SystemProbe::new(&config);
        Self::with_parts(SystemMountSource, probe, config)
    }
}

impl Default for VolumeResolver<SystemMountSource, SystemProbe> {
    fn default() -> Self {
        Self::new(VolumeConfig::default())
    }
}

impl<S: MountSource + 'static, P: VolumeProbe> VolumeResolver<S, P> {
    /// A resolver with its own mount table over `source`.
    pub fn with_parts(source: S, probe: P, config: VolumeConfig) -> Self {
        let table = Arc::new(MountTable::new(source, config.clone()));
        Self::with_table(table, probe, config)
    }

    /// A resolver sharing an existing mount table.
    pub fn with_table(table: Arc<MountTable<S>>, probe: P, config: VolumeConfig) -> Self {
        Self {
            table,
            probe,
            identities: IdentityResolver::default(),
            config,
        }
    }

    /// Replace the identity fallback chain.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn IdentityStrategy>>) -> Self {
        self.identities = IdentityResolver::new(strategies);
        self
    }

    /// The shared mount table.
    pub fn mount_table(&self) -> &Arc<MountTable<S>> {
        &self.table
    }

    /// The metadata probe.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// The resolver configuration.
    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Refresh the mount table; see [`MountTable::refresh`].
    pub fn refresh(&self, force: bool) -> Arc<MountedVolumeSet> {
        self.table.refresh(force)
    }

    /// Stable identity of the volume holding `path`.
    ///
    /// Never fails; see [`crate::identity`] for the fallback order.
    pub fn identity(&self, path: &Path) -> VolumeIdentity {
        let path = absolute(path);
        let volumes = self.table.refresh(false);
        self.identity_in(&path, &volumes)
    }

    pub(crate) fn identity_in(&self, path: &Path, volumes: &MountedVolumeSet) -> VolumeIdentity {
        self.identities.identity(path, volumes, &self.probe)
    }

    /// Filesystem details of the mount holding `path`.
    pub fn filesystem_info(&self, path: &Path) -> Option<FileSystemInfo> {
        let path = absolute(path);
        let volumes = self.table.refresh(false);
        let mount = self.probe.owning_mount(&path, &volumes)?;
        let mut info = FileSystemInfo::from_mount(&mount);
        if let Some(details) = self.probe.volume_details(&path, &volumes) {
            info = info.with_details(&details);
        }

        if info.fs_type == "smbfs" {
            tracing::warn!(
                "{} is on smbfs, expect slow filesystem operations",
                path.display()
            );
        }
        tracing::debug!("{}: {:?}", path.display(), info);
        Some(info)
    }
}

impl<S: MountSource, P: VolumeProbe> std::fmt::Debug for VolumeResolver<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeResolver")
            .field("table", &self.table)
            .field("identities", &self.identities)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Make `path` absolute against the working directory without touching the
/// filesystem.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
