//! Walking from a path up to the root of its volume.
//!
//! Every operation takes one mount table snapshot up front and uses it for
//! the whole climb, so a concurrent refresh can't change the answer halfway.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::mount_source::MountSource;
use crate::probe::VolumeProbe;
use crate::resolver::{VolumeResolver, absolute};

/// Extension of the synthetic volume root returned when a climb runs out of
/// ancestors.
pub const FALLBACK_ROOT_EXTENSION: &str = "volid";

impl<S: MountSource + 'static, P: VolumeProbe> VolumeResolver<S, P> {
    /// Root of the volume holding `path`.
    ///
    /// Climbs from `path` and returns the first ancestor (or `path` itself)
    /// that is either a volume with the same identity as `path`, or listed in
    /// the mount table. The identity check wins when both hold at different
    /// levels, since it is tried first at every step.
    ///
    /// Running out of ancestors logs an error and returns
    /// `<fallback_parent>/<random uuid>.volid`.
    pub fn volume_root(&self, path: &Path) -> PathBuf {
        let path = absolute(path);
        let volumes = self.table.refresh(false);
        let target = self.identity_in(&path, &volumes);

        let mut current = path.as_path();
        loop {
            if self.probe.is_volume(current) && self.identity_in(current, &volumes) == target {
                return current.to_path_buf();
            }
            if volumes.contains(current) {
                return current.to_path_buf();
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let fallback = self.config.fallback_parent.join(format!(
            "{}.{FALLBACK_ROOT_EXTENSION}",
            Uuid::new_v4().hyphenated().to_string().to_uppercase()
        ));
        tracing::error!(
            "No volume root found above {}, using {}",
            path.display(),
            fallback.display()
        );
        fallback
    }

    /// `path` and its ancestors that share its volume identity, nearest
    /// first. The last element is the highest such ancestor.
    pub fn paths_from_volume_root(&self, path: &Path) -> Vec<PathBuf> {
        let path = absolute(path);
        let volumes = self.table.refresh(false);
        let target = self.identity_in(&path, &volumes);

        let mut paths = vec![path.clone()];
        let mut current = path.as_path();
        while let Some(parent) = current.parent() {
            if self.identity_in(parent, &volumes) != target {
                break;
            }
            paths.push(parent.to_path_buf());
            current = parent;
        }
        paths
    }

    /// The topmost ancestor of `path` on the same volume.
    pub fn volume_root_path(&self, path: &Path) -> PathBuf {
        self.paths_from_volume_root(path)
            .pop()
            .unwrap_or_else(|| absolute(path))
    }
}
