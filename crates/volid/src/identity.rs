//! Stable volume identities.
//!
//! A [`VolumeIdentity`] is produced by the first [`IdentityStrategy`] in an
//! ordered chain that has an answer for a path:
//!
//! 1. [`VolumeUuidStrategy`] - the native volume UUID, verbatim (local disks)
//! 2. [`RemountingUrlStrategy`] - MD5 of the volume's remounting URL
//!    (network shares without a UUID)
//! 3. [`PathDigestStrategy`] - MD5 of the raw path string
//!
//! Reaching step 2 or 3 means the identity won't reliably survive a remount,
//! so both log at error level.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::mount_table::MountedVolumeSet;
use crate::probe::VolumeProbe;

/// Which strategy produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentitySource {
    /// Native volume UUID
    VolumeUuid,
    /// Digest of the remounting URL
    RemountingUrl,
    /// Digest of the path string
    PathDigest,
}

/// A non-empty token identifying a mounted volume.
///
/// Equality only compares the token, not how it was obtained.
#[derive(Debug, Clone)]
pub struct VolumeIdentity {
    token: String,
    source: IdentitySource,
}

impl VolumeIdentity {
    pub(crate) fn new(token: String, source: IdentitySource) -> Self {
        debug_assert!(!token.is_empty());
        Self { token, source }
    }

    /// The identity token.
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// How the token was obtained.
    pub fn source(&self) -> IdentitySource {
        self.source
    }

    /// Consume into the token string.
    pub fn into_string(self) -> String {
        self.token
    }
}

impl PartialEq for VolumeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for VolumeIdentity {}

impl std::hash::Hash for VolumeIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl PartialEq<str> for VolumeIdentity {
    fn eq(&self, other: &str) -> bool {
        self.token == other
    }
}

impl PartialEq<&str> for VolumeIdentity {
    fn eq(&self, other: &&str) -> bool {
        self.token == *other
    }
}

impl fmt::Display for VolumeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

impl AsRef<str> for VolumeIdentity {
    fn as_ref(&self) -> &str {
        &self.token
    }
}

/// MD5 of `input`, shaped like a UUID.
///
/// The lowercase hex digest gets dashes in the 8-4-4-4-12 positions and is
/// uppercased. A digest that isn't exactly 32 hex characters is returned
/// uppercased without dashes.
pub fn uuid_shaped_md5(input: &str) -> String {
    let hex = format!("{:x}", md5::compute(input.as_bytes()));
    dash_uuid_shape(&hex)
}

fn dash_uuid_shape(hex: &str) -> String {
    if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex.to_uppercase();
    }
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
    .to_uppercase()
}

/// Inputs available to every strategy for one resolution.
pub struct ResolveContext<'a> {
    /// The path the caller asked about.
    pub requested: &'a Path,
    /// The nearest readable ancestor (or mount point) of `requested`.
    pub resolved: &'a Path,
    /// Mount table snapshot used for this resolution.
    pub volumes: &'a MountedVolumeSet,
    /// Metadata source.
    pub probe: &'a dyn VolumeProbe,
}

/// One layer of the identity fallback chain.
pub trait IdentityStrategy: Send + Sync {
    /// The source tag of identities from this strategy.
    fn source(&self) -> IdentitySource;

    /// Produce an identity token, or `None` to defer to the next strategy.
    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String>;
}

/// Native volume UUID of the resolved path.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeUuidStrategy;

impl IdentityStrategy for VolumeUuidStrategy {
    fn source(&self) -> IdentitySource {
        IdentitySource::VolumeUuid
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String> {
        ctx.probe
            .volume_uuid(ctx.resolved, ctx.volumes)
            .filter(|uuid| !uuid.is_empty())
    }
}

/// Digest of the remounting URL of the resolved path's volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemountingUrlStrategy;

impl IdentityStrategy for RemountingUrlStrategy {
    fn source(&self) -> IdentitySource {
        IdentitySource::RemountingUrl
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String> {
        let url = ctx.probe.remounting_url(ctx.resolved, ctx.volumes)?;
        tracing::error!(
            "No volume UUID for {}, using md5 of remounting URL '{}'",
            ctx.resolved.display(),
            url
        );
        Some(uuid_shaped_md5(&url))
    }
}

/// Digest of the requested path string. Always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathDigestStrategy;

impl IdentityStrategy for PathDigestStrategy {
    fn source(&self) -> IdentitySource {
        IdentitySource::PathDigest
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String> {
        tracing::error!(
            "No volume UUID or remounting URL for {}, using md5 of the path",
            ctx.requested.display()
        );
        Some(path_digest(ctx.requested))
    }
}

fn path_digest(path: &Path) -> String {
    uuid_shaped_md5(&path.to_string_lossy())
}

/// The default strategy chain: UUID, remounting URL, path digest.
pub fn default_strategies() -> Vec<Box<dyn IdentityStrategy>> {
    vec![
        Box::new(VolumeUuidStrategy),
        Box::new(RemountingUrlStrategy),
        Box::new(PathDigestStrategy),
    ]
}

/// Computes [`VolumeIdentity`] values through an ordered strategy chain.
pub struct IdentityResolver {
    strategies: Vec<Box<dyn IdentityStrategy>>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<_> = self.strategies.iter().map(|s| s.source()).collect();
        f.debug_struct("IdentityResolver")
            .field("strategies", &sources)
            .finish()
    }
}

impl IdentityResolver {
    /// A resolver trying `strategies` in order.
    pub fn new(strategies: Vec<Box<dyn IdentityStrategy>>) -> Self {
        Self { strategies }
    }

    /// Identity of the volume holding `path`.
    ///
    /// Unreadable paths are first climbed to the nearest readable ancestor or
    /// mount point. If every strategy declines, the path digest is used, so
    /// the result is never empty.
    pub fn identity(
        &self,
        path: &Path,
        volumes: &MountedVolumeSet,
        probe: &dyn VolumeProbe,
    ) -> VolumeIdentity {
        let resolved = readable_ancestor(path, volumes, probe);
        let ctx = ResolveContext {
            requested: path,
            resolved: &resolved,
            volumes,
            probe,
        };

        for strategy in &self.strategies {
            if let Some(token) = strategy.resolve(&ctx).filter(|t| !t.is_empty()) {
                return VolumeIdentity::new(token, strategy.source());
            }
        }

        tracing::error!(
            "Every identity strategy declined {}, using md5 of the path",
            path.display()
        );
        VolumeIdentity::new(path_digest(path), IdentitySource::PathDigest)
    }
}

/// Climb from `path` until a readable path or a mount point is reached.
fn readable_ancestor(path: &Path, volumes: &MountedVolumeSet, probe: &dyn VolumeProbe) -> PathBuf {
    let mut current = path;

    if probe.is_readable(current) {
        return current.to_path_buf();
    }

    while !probe.is_readable(current) && !volumes.contains(current) {
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => break,
        }
    }

    if !probe.is_readable(current) {
        tracing::warn!(
            "Unreadable volume for {} (climbed to {})",
            path.display(),
            current.display()
        );
    }
    current.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_source::SystemMount;
    use crate::testing::FakeProbe;

    fn volumes(paths: &[&str]) -> MountedVolumeSet {
        MountedVolumeSet::from_mounts(
            paths
                .iter()
                .map(|p| SystemMount::new(*p, "apfs", "/dev/disk1s1"))
                .collect(),
            None,
        )
    }

    #[test]
    fn test_uuid_shaped_md5_known_value() {
        let hex = format!("{:x}", md5::compute(b"/tmp/example"));
        let shaped = uuid_shaped_md5("/tmp/example");

        assert_eq!(shaped.len(), 36);
        assert_eq!(shaped.replace('-', ""), hex.to_uppercase());
        for idx in [8, 13, 18, 23] {
            assert_eq!(shaped.as_bytes()[idx], b'-');
        }
    }

    #[test]
    fn test_uuid_shaped_md5_empty_string() {
        assert_eq!(uuid_shaped_md5(""), "D41D8CD9-8F00-B204-E980-0998ECF8427E");
    }

    #[test]
    fn test_dash_shape_skipped_for_odd_lengths() {
        assert_eq!(dash_uuid_shape("abc123"), "ABC123");
        assert_eq!(
            dash_uuid_shape("d41d8cd98f00b204e9800998ecf8427e"),
            "D41D8CD9-8F00-B204-E980-0998ECF8427E"
        );
    }

    #[test]
    fn test_uuid_returned_verbatim() {
        let probe = FakeProbe::new()
            .readable("/Volumes/Data/file")
            .uuid("/Volumes/Data/file", "0a81f3b1-local");
        let identity = IdentityResolver::default().identity(
            Path::new("/Volumes/Data/file"),
            &volumes(&["/", "/Volumes/Data"]),
            &probe,
        );

        assert_eq!(identity, "0a81f3b1-local");
        assert_eq!(identity.source(), IdentitySource::VolumeUuid);
    }

    #[test]
    fn test_remounting_url_fallback() {
        let probe = FakeProbe::new()
            .readable("/Volumes/share/doc")
            .remounting_url("/Volumes/share/doc", "smb://nas/share");
        let identity = IdentityResolver::default().identity(
            Path::new("/Volumes/share/doc"),
            &volumes(&["/", "/Volumes/share"]),
            &probe,
        );

        assert_eq!(identity.as_str(), uuid_shaped_md5("smb://nas/share"));
        assert_eq!(identity.source(), IdentitySource::RemountingUrl);
    }

    #[test]
    fn test_path_digest_fallback_uses_requested_path() {
        let probe = FakeProbe::new();
        let identity = IdentityResolver::default().identity(
            Path::new("/tmp/example"),
            &volumes(&["/"]),
            &probe,
        );

        assert_eq!(identity.as_str(), uuid_shaped_md5("/tmp/example"));
        assert_eq!(identity.source(), IdentitySource::PathDigest);
    }

    #[test]
    fn test_unreadable_path_climbs_to_readable_parent() {
        // Only the readable ancestor has a UUID
        let probe = FakeProbe::new()
            .readable("/Users/me")
            .uuid("/Users/me", "HOME-UUID");
        let identity = IdentityResolver::default().identity(
            Path::new("/Users/me/Library/Mail/V10"),
            &volumes(&["/"]),
            &probe,
        );

        assert_eq!(identity, "HOME-UUID");
    }

    #[test]
    fn test_climb_stops_at_mount_point() {
        let probe = FakeProbe::new()
            .readable("/")
            .uuid("/", "ROOT-UUID")
            .uuid("/Volumes/Locked", "LOCKED-UUID");
        let identity = IdentityResolver::default().identity(
            Path::new("/Volumes/Locked/secret"),
            &volumes(&["/", "/Volumes/Locked"]),
            &probe,
        );

        assert_eq!(identity, "LOCKED-UUID");
    }

    #[test]
    fn test_custom_chain_falls_back_to_digest() {
        let resolver = IdentityResolver::new(vec![Box::new(VolumeUuidStrategy)]);
        let identity = resolver.identity(Path::new("/a/b"), &volumes(&["/"]), &FakeProbe::new());

        assert_eq!(identity.as_str(), uuid_shaped_md5("/a/b"));
        assert_eq!(identity.source(), IdentitySource::PathDigest);
    }

    #[test]
    fn test_empty_uuid_is_skipped() {
        let probe = FakeProbe::new().readable("/x").uuid("/x", "");
        let identity = IdentityResolver::default().identity(Path::new("/x"), &volumes(&["/"]), &probe);
        assert_eq!(identity.source(), IdentitySource::PathDigest);
    }
}
