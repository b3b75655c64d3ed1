//! The process-global driver registry.
//!
//! `Drivers` orchestrates the two-phase scan: a child process performs the
//! potentially unsafe first load of every candidate file and persists the
//! outcome as a manifest; the trusted parent rebuilds its driver list from
//! that manifest without executing any plugin code, gated by a freshness
//! check over the plugin mtimes and the dynamic-linker cache. At steady state
//! only [`Driver::create_factory`](crate::driver::Driver::create_factory)
//! dlopens user plugins.

use crate::config::RuntimeConfig;
use crate::driver::descriptor::DriverDesc;
use crate::driver::loader::{Driver, DriverFactoryHandle};
use crate::driver::scan_info::{
    generate_check_code, version_record_now, ScanDriverEntry, ScanInfo,
};
use crate::driver::subprocess::{ForkRunner, SubprocessRunner};
use crate::driver::traits::{DriverDescriptionFn, DRIVER_DESCRIPTION_SYMBOL};
use crate::error::{DriverError, DriverResult};
use crate::utils;
use libloading::os::unix::{Library, RTLD_LAZY, RTLD_LOCAL};
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Built-in search path appended unless `driver.skip_default_path` is set.
pub const DEFAULT_DRIVER_PATH: &str = "/usr/local/lib/modelbox";

/// File-name pattern a driver shared object must match.
pub const DRIVER_FILE_FILTER: &str = "libmodelbox-*.so*";

/// Well-known location of the persisted scan manifest.
pub const DEFAULT_SCAN_INFO: &str = "/tmp/modelbox-driver-scan-info.json";

/// Dynamic-linker cache whose mtime invalidates the manifest.
pub const DEFAULT_LD_CACHE: &str = "/etc/ld.so.cache";

/// Driver class whose factories enumerate further drivers.
pub const DRIVER_CLASS_VIRTUAL: &str = "VIRTUAL";

#[derive(Debug, Default)]
struct ScanResultInfo {
    load_success: Vec<String>,
    load_failed: BTreeMap<String, String>,
}

#[derive(Default)]
struct RegistryState {
    drivers: Vec<Arc<Driver>>,
    virtual_managers: Vec<DriverFactoryHandle>,
    driver_dirs: Vec<PathBuf>,
    config: Option<Arc<RuntimeConfig>>,
    last_modify_time_sum: i64,
    scan_result: ScanResultInfo,
}

/// The driver registry.
///
/// A process normally uses the [`Drivers::global`] singleton; tests build
/// isolated instances with their own manifest path, linker-cache path, and
/// subprocess runner. Scan, manifest handling, and `clear` are expected on a
/// single thread during startup and shutdown; the query operations are
/// read-only and may run concurrently with each other.
pub struct Drivers {
    state: RwLock<RegistryState>,
    scan_info_path: PathBuf,
    ld_cache_path: PathBuf,
    runner: Box<dyn SubprocessRunner>,
}

lazy_static! {
    static ref DRIVERS: Arc<Drivers> = Arc::new(Drivers::new());
}

impl Drivers {
    /// The process-wide registry.
    pub fn global() -> Arc<Drivers> {
        DRIVERS.clone()
    }

    pub fn new() -> Self {
        Self::with_runner(
            Box::new(ForkRunner),
            PathBuf::from(DEFAULT_SCAN_INFO),
            PathBuf::from(DEFAULT_LD_CACHE),
        )
    }

    /// Registry with injectable scan collaborators.
    pub fn with_runner(
        runner: Box<dyn SubprocessRunner>,
        scan_info_path: PathBuf,
        ld_cache_path: PathBuf,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            scan_info_path,
            ld_cache_path,
            runner,
        }
    }

    /// Take over the search directories from the runtime configuration.
    pub fn initialize(&self, config: Arc<RuntimeConfig>) -> DriverResult<()> {
        let mut state = self.state.write();
        state.driver_dirs = config.driver.dir.clone();
        if !config.driver.skip_default_path {
            state.driver_dirs.push(PathBuf::from(DEFAULT_DRIVER_PATH));
        }

        debug!("driver search path:");
        for dir in &state.driver_dirs {
            debug!("  {}", dir.display());
        }

        state.config = Some(config);
        Ok(())
    }

    /// Discover drivers below the configured directories.
    ///
    /// When the persisted manifest still matches the on-disk world the
    /// first-load pass is skipped entirely; otherwise a subprocess probes
    /// every candidate file and rewrites the manifest. Either way the driver
    /// list is rebuilt from the manifest and virtual drivers are expanded.
    pub fn scan(&self) -> DriverResult<()> {
        if !self.check_path_and_magic_code() {
            if let Err(err) = self.runner.run(&|| self.inner_scan()) {
                let msg = format!("subprocess driver scan failed, {}", err);
                error!("{}", msg);
                return Err(DriverError::Fault(msg));
            }
        }

        if let Err(err) = self.gather_scan_info(&self.scan_info_path) {
            let msg = format!("gather scan info failed, {}", err);
            error!("{}", msg);
            return Err(DriverError::Fault(msg));
        }

        self.print_scan_results(&self.scan_info_path);

        info!("begin scan virtual drivers");
        let status = self.virtual_driver_scan();
        info!("end scan virtual drivers");
        status
    }

    /// Scan one search-path entry. A plain file is probed directly; a
    /// directory is listed through `filter`.
    pub fn scan_path(&self, path: &Path, filter: &str) -> DriverResult<()> {
        let meta = std::fs::symlink_metadata(path)
            .map_err(|err| DriverError::Fault(format!("stat {} failed: {}", path.display(), err)))?;

        if !meta.is_dir() {
            self.state.write().last_modify_time_sum += meta.mtime();
            return self.record_add(path);
        }

        let files = utils::list_files(path, filter).map_err(|err| {
            DriverError::Fault(format!(
                "list directory {}/{} failed, {}",
                path.display(),
                filter,
                err
            ))
        })?;

        if files.is_empty() {
            return Err(DriverError::NotFound("directory is empty".to_string()));
        }

        for file in files {
            let Ok(meta) = std::fs::symlink_metadata(&file) else {
                continue;
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            self.state.write().last_modify_time_sum += meta.mtime();
            let _ = self.record_add(&file);
        }

        Ok(())
    }

    fn record_add(&self, file: &Path) -> DriverResult<()> {
        match self.add(file) {
            Ok(()) => {
                self.state
                    .write()
                    .scan_result
                    .load_success
                    .push(file.display().to_string());
                Ok(())
            }
            Err(err) => {
                self.state
                    .write()
                    .scan_result
                    .load_failed
                    .insert(file.display().to_string(), err.to_string());
                Err(err)
            }
        }
    }

    /// First-load pass; runs in the scan subprocess.
    fn inner_scan(&self) -> DriverResult<()> {
        {
            // A fresh pass starts a fresh record; the forked child inherits
            // whatever the parent accumulated.
            let mut state = self.state.write();
            state.last_modify_time_sum = 0;
            state.scan_result = ScanResultInfo::default();
        }

        let dirs = self.state.read().driver_dirs.clone();
        for dir in &dirs {
            if let Err(err) = self.scan_path(dir, DRIVER_FILE_FILTER) {
                if !matches!(err, DriverError::NotFound(_)) {
                    warn!("scan {} failed, {}", dir.display(), err);
                }
            }
        }

        let check_code = generate_check_code(self.state.read().last_modify_time_sum);
        self.write_scan_info(&self.scan_info_path, &check_code)
            .map_err(|err| {
                error!("write scan info failed, {}", err);
                DriverError::Fault("write scan info failed".to_string())
            })
    }

    /// Persist the current scan outcome as a manifest.
    pub fn write_scan_info(&self, path: &Path, check_code: &str) -> DriverResult<()> {
        let ld_cache_time = utils::mtime_seconds(&self.ld_cache_path).unwrap_or(0);

        let state = self.state.read();
        let mut scan_drivers = Vec::new();
        for driver in &state.drivers {
            let desc = driver.desc();
            scan_drivers.push(ScanDriverEntry::Success {
                class: desc.class().to_string(),
                driver_type: desc.driver_type().to_string(),
                name: desc.name().to_string(),
                description: desc.description().to_string(),
                version: desc.version().to_string(),
                file_path: desc.file_path().to_path_buf(),
                no_delete: desc.no_delete(),
                global: desc.global(),
                deep_bind: desc.deep_bind(),
                load_success: true,
            });
        }

        debug!("load failed info size {}", state.scan_result.load_failed.len());
        for (file, err_msg) in &state.scan_result.load_failed {
            scan_drivers.push(ScanDriverEntry::Failure {
                file_path: PathBuf::from(file),
                err_msg: err_msg.clone(),
                load_success: false,
            });
        }
        drop(state);

        let manifest = ScanInfo {
            ld_cache_time,
            check_code: check_code.to_string(),
            version_record: version_record_now(),
            scan_drivers,
        };
        manifest.write(path)
    }

    /// Rebuild the driver list from a manifest without touching any library.
    pub fn gather_scan_info(&self, path: &Path) -> DriverResult<()> {
        let manifest = ScanInfo::read(path)?;

        for entry in manifest.scan_drivers {
            let ScanDriverEntry::Success {
                class,
                driver_type,
                name,
                description,
                version,
                file_path,
                no_delete,
                global,
                deep_bind,
                ..
            } = entry
            else {
                continue;
            };

            let mut desc = DriverDesc::default();
            desc.set_class(&class);
            desc.set_type(&driver_type);
            desc.set_name(&name);
            desc.set_description(description);
            // A version the manifest recorded but validation rejects is
            // carried as "unversioned".
            let _ = desc.set_version(&version);
            desc.set_file_path(file_path);
            desc.set_no_delete(no_delete);
            desc.set_global(global);
            desc.set_deep_bind(deep_bind);

            if self
                .get_driver(&class, &driver_type, &name, &version)
                .is_none()
            {
                self.state.write().drivers.push(Arc::new(Driver::new(desc)));
            }
        }

        info!(
            "gather scan info success, drivers count {}",
            self.state.read().drivers.len()
        );
        Ok(())
    }

    /// Whether the persisted manifest still describes the on-disk world.
    pub fn check_path_and_magic_code(&self) -> bool {
        if !self.scan_info_path.exists() {
            debug!("{} does not exist", self.scan_info_path.display());
            return false;
        }

        let Ok(ld_cache_time) = utils::mtime_seconds(&self.ld_cache_path) else {
            debug!("{} does not exist", self.ld_cache_path.display());
            return false;
        };

        let Ok(manifest) = ScanInfo::read(&self.scan_info_path) else {
            return false;
        };

        if manifest.ld_cache_time != ld_cache_time {
            return false;
        }

        let mut manifest_files = HashSet::new();
        for entry in &manifest.scan_drivers {
            let (ScanDriverEntry::Success { file_path, .. }
            | ScanDriverEntry::Failure { file_path, .. }) = entry;
            manifest_files.insert(file_path.display().to_string());
        }

        let mut check_sum: i64 = 0;
        let dirs = self.state.read().driver_dirs.clone();
        for dir in &dirs {
            let Ok(meta) = std::fs::symlink_metadata(dir) else {
                error!("stat {} failed", dir.display());
                return false;
            };

            if !meta.is_dir() {
                check_sum += meta.mtime();
                continue;
            }

            let files = match utils::list_files(dir, DRIVER_FILE_FILTER) {
                Ok(files) => files,
                Err(err) => {
                    error!(
                        "list directory {}/{} failed, {}",
                        dir.display(),
                        DRIVER_FILE_FILTER,
                        err
                    );
                    return false;
                }
            };

            for file in files {
                let Ok(meta) = std::fs::symlink_metadata(&file) else {
                    continue;
                };
                if meta.file_type().is_symlink() {
                    continue;
                }
                if !manifest_files.contains(&file.display().to_string()) {
                    return false;
                }
                check_sum += meta.mtime();
            }
        }

        generate_check_code(check_sum) == manifest.check_code
    }

    /// Probe `file` and register its descriptor.
    ///
    /// The library is opened with lazy binding and local visibility, only
    /// long enough to read `DriverDescription`; a successful add keeps no
    /// library open, except for the deliberate no-delete pin.
    pub fn add(&self, file: &Path) -> DriverResult<()> {
        let library = unsafe { Library::open(Some(file), RTLD_LAZY | RTLD_LOCAL) }.map_err(
            |err| DriverError::Invalid(format!("{}: dlopen failed, {}", file.display(), err)),
        )?;

        let describe: DriverDescriptionFn = match unsafe {
            library.get::<DriverDescriptionFn>(DRIVER_DESCRIPTION_SYMBOL.as_bytes())
        } {
            Ok(symbol) => *symbol,
            Err(err) => {
                return Err(DriverError::NotSupported(format!(
                    "{}: dlsym {} failed, {}",
                    file.display(),
                    DRIVER_DESCRIPTION_SYMBOL,
                    err
                )));
            }
        };

        let mut desc = DriverDesc::default();
        unsafe { describe(&mut desc) };

        if self.contains(&desc) {
            debug!(
                "add driver {} skipped, same function library already registered",
                file.display()
            );
            return Err(DriverError::Exist(format!(
                "{}: driver is already registered",
                file.display()
            )));
        }

        desc.set_file_path(file);

        if desc.no_delete() {
            // One open with NODELETE pins the library in process memory even
            // though no user holds it yet.
            match unsafe { Library::open(Some(file), RTLD_LAZY | RTLD_LOCAL | libc::RTLD_NODELETE) }
            {
                Ok(pin) => drop(pin),
                Err(_) => warn!("dlopen {} as no delete failed", file.display()),
            }
        }

        debug!("add driver:");
        debug!("  name: {}", desc.name());
        debug!("  class: {}", desc.class());
        debug!("  type: {}", desc.driver_type());
        debug!("  description: {}", desc.description());
        debug!("  version: {}", desc.version());
        debug!("  driver file: {}", file.display());

        self.state.write().drivers.push(Arc::new(Driver::new(desc)));
        Ok(())
    }

    fn contains(&self, desc: &DriverDesc) -> bool {
        self.state
            .read()
            .drivers
            .iter()
            .any(|driver| driver.desc().same_identity(desc))
    }

    /// Load every `VIRTUAL`-class driver and absorb the drivers it
    /// enumerates. The managers are retained so they outlive their drivers.
    pub fn virtual_driver_scan(&self) -> DriverResult<()> {
        let dirs = self.state.read().driver_dirs.clone();

        for driver in self.drivers_by_class(DRIVER_CLASS_VIRTUAL) {
            let factory = match driver.create_factory() {
                Ok(factory) => factory,
                Err(_) => continue,
            };

            let Some(manager) = factory.as_virtual_driver_manager() else {
                continue;
            };

            if let Err(err) = manager.init(self) {
                warn!("virtual driver init failed, {}", err);
            }

            if let Err(err) = manager.scan(&dirs) {
                warn!("virtual driver scan failed, {}", err);
            }

            let enumerated = manager.drivers();
            let mut state = self.state.write();
            state.drivers.extend(enumerated);
            state.virtual_managers.push(factory);
        }

        Ok(())
    }

    /// Emit the user-facing summary of a scan from its manifest.
    pub fn print_scan_results(&self, path: &Path) {
        let manifest = match ScanInfo::read(path) {
            Ok(manifest) => manifest,
            Err(err) => {
                error!("open {} for read failed, {}", path.display(), err);
                return;
            }
        };

        let mut load_success = Vec::new();
        let mut load_failed = BTreeMap::new();
        for entry in &manifest.scan_drivers {
            match entry {
                ScanDriverEntry::Success { file_path, .. } => {
                    load_success.push(file_path.display().to_string());
                }
                ScanDriverEntry::Failure {
                    file_path, err_msg, ..
                } => {
                    load_failed.insert(file_path.display().to_string(), err_msg.clone());
                }
            }
        }

        Self::print_scan_result(&load_success, &load_failed);
    }

    fn print_scan_result(load_success: &[String], load_failed: &BTreeMap<String, String>) {
        if load_success.is_empty() {
            warn!("no driver load success, please check");
        } else {
            info!(
                "load success drivers: count {}, show detail in debug level",
                load_success.len()
            );
            for file in load_success {
                debug!("{}", file);
            }
        }

        if load_failed.is_empty() {
            info!("no drivers load failed");
        } else {
            warn!("load failed drivers: count {}, detail:", load_failed.len());
            for err_msg in load_failed.values() {
                warn!("{}", err_msg);
            }
        }
    }

    pub fn all_drivers(&self) -> Vec<Arc<Driver>> {
        self.state.read().drivers.clone()
    }

    pub fn drivers_by_class(&self, driver_class: &str) -> Vec<Arc<Driver>> {
        self.state
            .read()
            .drivers
            .iter()
            .filter(|driver| driver.desc().class() == driver_class)
            .cloned()
            .collect()
    }

    pub fn driver_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self
            .state
            .read()
            .drivers
            .iter()
            .map(|driver| driver.desc().class().to_string())
            .collect();
        utils::dedup(&mut classes);
        classes
    }

    pub fn driver_types(&self, driver_class: &str) -> Vec<String> {
        let mut types: Vec<String> = self
            .state
            .read()
            .drivers
            .iter()
            .filter(|driver| driver.desc().class() == driver_class)
            .map(|driver| driver.desc().driver_type().to_string())
            .collect();
        utils::dedup(&mut types);
        types
    }

    pub fn driver_names(&self, driver_class: &str, driver_type: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .read()
            .drivers
            .iter()
            .filter(|driver| {
                driver.desc().class() == driver_class
                    && driver.desc().driver_type() == driver_type
            })
            .map(|driver| driver.desc().name().to_string())
            .collect();
        utils::dedup(&mut names);
        names
    }

    /// Exact version match when one is requested; otherwise the candidate
    /// with the greatest version string.
    pub fn get_driver(
        &self,
        driver_class: &str,
        driver_type: &str,
        driver_name: &str,
        driver_version: &str,
    ) -> Option<Arc<Driver>> {
        let state = self.state.read();
        let mut best: Option<&Arc<Driver>> = None;
        for driver in &state.drivers {
            let desc = driver.desc();
            if desc.class() != driver_class
                || desc.driver_type() != driver_type
                || desc.name() != driver_name
            {
                continue;
            }

            if desc.version() == driver_version {
                return Some(driver.clone());
            }

            match best {
                None => best = Some(driver),
                Some(current) if current.desc().version() < desc.version() => best = Some(driver),
                _ => {}
            }
        }

        best.cloned()
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.state.read().driver_dirs.clone()
    }

    /// Return the registry to its pre-initialize state. Virtual drivers go
    /// first so their backing managers outlive them.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.drivers.retain(|driver| !driver.is_virtual());
        state.drivers.clear();
        state.virtual_managers.clear();
        state.driver_dirs.clear();
        state.config = None;
        state.last_modify_time_sum = 0;
        state.scan_result = ScanResultInfo::default();
    }
}

impl Default for Drivers {
    fn default() -> Self {
        Self::new()
    }
}
