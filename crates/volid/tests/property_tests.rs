//! Property tests for identity digests and mount lookup.

mod common;

use std::path::PathBuf;

use proptest::prelude::*;
use volid::testing::{FakeProbe, StaticMountSource};
use volid::{MountedVolumeSet, SystemMount, uuid_shaped_md5};

fn component() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "Volumes", "data", "x y", "mnt"]).prop_map(str::to_string)
}

fn abs_path(max_depth: usize) -> impl Strategy<Value = PathBuf> {
    prop::collection::vec(component(), 0..=max_depth).prop_map(|parts| {
        let mut path = PathBuf::from("/");
        path.extend(parts);
        path
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_digest_is_uuid_shaped(input in ".*") {
        let digest = uuid_shaped_md5(&input);

        prop_assert_eq!(digest.len(), 36);
        for (i, c) in digest.char_indices() {
            if [8, 13, 18, 23].contains(&i) {
                prop_assert_eq!(c, '-');
            } else {
                prop_assert!(c.is_ascii_digit() || ('A'..='F').contains(&c));
            }
        }
        prop_assert_eq!(digest, uuid_shaped_md5(&input));
    }

    #[test]
    fn test_enclosing_mount_is_deepest_prefix(
        mounts in prop::collection::vec(abs_path(3), 1..6),
        query in abs_path(5),
    ) {
        let set = MountedVolumeSet::from_mounts(
            mounts.iter().map(|m| SystemMount::new(m.clone(), "apfs", "/dev/disk1s1")).collect(),
            None,
        );
        let expected = mounts
            .iter()
            .filter(|m| query.starts_with(m))
            .max_by_key(|m| m.components().count());

        prop_assert_eq!(set.enclosing_mount(&query).map(|m| &m.mountpoint), expected);
    }

    #[test]
    fn test_paths_on_one_volume_share_identity(
        a in abs_path(4),
        b in abs_path(4),
    ) {
        let source = StaticMountSource::new(["/", "/Volumes/data"]);
        let probe = FakeProbe::new()
            .all_readable()
            .volume("/", "ROOT")
            .volume("/Volumes/data", "DATA");
        let resolver = common::fake_resolver(&source, probe);

        let a = PathBuf::from("/Volumes/data").join(a.strip_prefix("/").unwrap());
        let b = PathBuf::from("/Volumes/data").join(b.strip_prefix("/").unwrap());
        prop_assert_eq!(resolver.identity(&a), resolver.identity(&b));
        prop_assert_eq!(resolver.volume_root(&a), PathBuf::from("/Volumes/data"));
    }
}
