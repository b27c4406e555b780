//! Shared helpers for volid integration tests.

#![allow(dead_code)]

use volid::testing::{FakeProbe, StaticMountSource};
use volid::{VolumeConfig, VolumeResolver};

/// Install a test-writer subscriber once; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("volid=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A resolver over fakes, with the background watcher disabled.
pub fn fake_resolver(
    source: &StaticMountSource,
    probe: FakeProbe,
) -> VolumeResolver<StaticMountSource, FakeProbe> {
    init_tracing();
    VolumeResolver::with_parts(source.clone(), probe, VolumeConfig::without_watcher())
}

/// The usual layout: a boot volume and one external disk.
pub fn boot_and_data() -> (StaticMountSource, FakeProbe) {
    let source = StaticMountSource::new(["/", "/Volumes/Data"]);
    let probe = FakeProbe::new()
        .all_readable()
        .volume("/", "6F1D1B2A-ROOT")
        .volume("/Volumes/Data", "A4C0E8D2-DATA");
    (source, probe)
}
