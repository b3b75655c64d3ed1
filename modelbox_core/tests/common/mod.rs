//! Shared helpers for the registry integration tests.
#![allow(dead_code)]

use modelbox_core::{DriverConfig, DriverResult, Drivers, RuntimeConfig, SubprocessRunner};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Directory the workspace build artifacts land in.
fn target_dir() -> PathBuf {
    let mut dir = std::env::current_exe().expect("test binary path");
    dir.pop(); // strip the binary name
    if dir.ends_with("deps") {
        dir.pop();
    }
    dir
}

/// Locate a fixture cdylib, or None when it has not been built.
pub fn fixture(artifact: &str) -> Option<PathBuf> {
    for candidate in [target_dir().join(artifact), target_dir().join("deps").join(artifact)] {
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

pub fn unit_driver() -> Option<PathBuf> {
    fixture("libmodelbox_driver_unit.so")
}

pub fn virtual_unit_driver() -> Option<PathBuf> {
    fixture("libmodelbox_driver_virtual_unit.so")
}

/// Copy `fixture` into `dir` under a name matching the driver file filter.
pub fn install(fixture: &Path, dir: &Path, name: &str) -> PathBuf {
    let dest = dir.join(name);
    std::fs::copy(fixture, &dest).expect("copy fixture");
    dest
}

/// Subprocess runner that counts invocations and runs the job inline.
pub struct CountingRunner {
    calls: Arc<AtomicUsize>,
}

impl SubprocessRunner for CountingRunner {
    fn run(&self, job: &(dyn Fn() -> DriverResult<()> + Sync)) -> DriverResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        job()
    }
}

/// Isolated registry over a temp manifest and a fake linker cache.
pub fn registry(dir: &TempDir) -> (Drivers, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let ld_cache = dir.path().join("ld.so.cache");
    std::fs::write(&ld_cache, b"cache").expect("write fake ld cache");
    let drivers = Drivers::with_runner(
        Box::new(CountingRunner {
            calls: calls.clone(),
        }),
        dir.path().join("scan-info.json"),
        ld_cache,
    );
    (drivers, calls)
}

pub fn initialize(drivers: &Drivers, plugin_dir: &Path) {
    let config = RuntimeConfig {
        driver: DriverConfig {
            dir: vec![plugin_dir.to_path_buf()],
            skip_default_path: true,
        },
        ..Default::default()
    };
    drivers
        .initialize(Arc::new(config))
        .expect("initialize registry");
}
