//! A discovered driver and its factory lifecycle.
//!
//! [`Driver::create_factory`] is the single entry point for acquiring a
//! usable factory, and the only place that dlopens user plugins at steady
//! state. The library is opened lazily on the first acquisition, initialized
//! once per process per handle, and torn down when the last
//! [`DriverFactoryHandle`] is released.

use crate::driver::descriptor::DriverDesc;
use crate::driver::handle::{DriverHandler, DriverHandlerInfo, RawHandle};
use crate::driver::traits::{
    CreateDriverFactoryFn, DriverFactory, DriverFiniFn, DriverInitFn, VirtualDriverManager,
    CREATE_DRIVER_FACTORY_SYMBOL, DRIVER_FINI_SYMBOL, DRIVER_INIT_SYMBOL,
};
use crate::error::{DriverError, DriverResult};
use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LOCAL, RTLD_NOW};
use log::error;
use parking_lot::Mutex;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::os::raw::c_int;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct FactoryState {
    factory_count: u32,
    handle: Option<RawHandle>,
    factory: Option<Arc<dyn DriverFactory>>,
}

/// One discovered plugin file.
///
/// The driver owns its descriptor exclusively. While `factory_count` is zero
/// the library is closed and no factory exists; while it is positive both are
/// present. Dropping a driver with outstanding factory references is a
/// programming error and aborts the process.
pub struct Driver {
    desc: DriverDesc,
    is_virtual: AtomicBool,
    state: Mutex<FactoryState>,
}

impl Driver {
    pub fn new(desc: DriverDesc) -> Self {
        Self {
            desc,
            is_virtual: AtomicBool::new(false),
            state: Mutex::new(FactoryState::default()),
        }
    }

    pub fn desc(&self) -> &DriverDesc {
        &self.desc
    }

    pub fn file(&self) -> &Path {
        self.desc.file_path()
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual.load(Ordering::Relaxed)
    }

    pub fn set_virtual(&self, is_virtual: bool) {
        self.is_virtual.store(is_virtual, Ordering::Relaxed);
    }

    /// Acquire a factory, loading and initializing the library on the first
    /// acquisition.
    ///
    /// Every successful call returns a shared handle whose release drops one
    /// factory reference; the last release closes the library again. On
    /// failure the driver is left as if the call had never been made.
    pub fn create_factory(self: &Arc<Self>) -> DriverResult<DriverFactoryHandle> {
        let mut state = self.state.lock();
        state.factory_count += 1;
        if state.factory_count == 1 {
            match self.open_factory() {
                Ok((handle, factory)) => {
                    state.handle = Some(handle);
                    state.factory = Some(factory);
                }
                Err(err) => {
                    state.factory_count -= 1;
                    error!("{}", err);
                    return Err(err);
                }
            }
        }

        let factory = match state.factory.clone() {
            Some(factory) => factory,
            None => {
                state.factory_count -= 1;
                return Err(DriverError::Fault(format!(
                    "factory missing for driver {}",
                    self.file().display()
                )));
            }
        };

        Ok(DriverFactoryHandle {
            driver: Arc::clone(self),
            factory: ManuallyDrop::new(factory),
        })
    }

    /// First-acquisition path: open the library, register the handle, run the
    /// one-time init, resolve the factory constructor. Unwinds fully on
    /// failure.
    fn open_factory(&self) -> DriverResult<(RawHandle, Arc<dyn DriverFactory>)> {
        let mode = dlopen_mode(
            self.desc.no_delete(),
            self.desc.global(),
            self.desc.deep_bind(),
        );

        let library = unsafe { Library::open(Some(self.file()), mode) }.map_err(|err| {
            DriverError::Invalid(format!(
                "dlopen {} failed, error: {}",
                self.file().display(),
                err
            ))
        })?;
        let handle = RawHandle(library.into_raw());

        let info = DriverHandler::global().add(handle);

        {
            let mut init_count = info.init.lock();
            *init_count += 1;
            if *init_count == 1 {
                if let Some(init) = unsafe { resolve::<DriverInitFn>(handle, DRIVER_INIT_SYMBOL) } {
                    if let Err(err) = unsafe { init() } {
                        *init_count -= 1;
                        drop(init_count);
                        DriverHandler::global().remove(handle);
                        close_handle(handle);
                        return Err(DriverError::Fault(format!(
                            "driver init failed, driver: {}, {}",
                            self.file().display(),
                            err
                        )));
                    }
                }
            }
        }

        match unsafe { resolve::<CreateDriverFactoryFn>(handle, CREATE_DRIVER_FACTORY_SYMBOL) } {
            Some(create) => {
                let factory: Arc<dyn DriverFactory> = Arc::from(unsafe { create() });
                Ok((handle, factory))
            }
            None => {
                self.release_init(handle, &info);
                close_handle(handle);
                Err(DriverError::Invalid(format!(
                    "failed to resolve {} in file: {}",
                    CREATE_DRIVER_FACTORY_SYMBOL,
                    self.file().display()
                )))
            }
        }
    }

    fn close_factory(&self) {
        let mut state = self.state.lock();
        self.close_factory_locked(&mut state);
    }

    /// Teardown half of the factory lifecycle; runs under the driver mutex.
    fn close_factory_locked(&self, state: &mut FactoryState) {
        state.factory_count -= 1;
        if state.factory_count > 0 {
            return;
        }

        let Some(handle) = state.handle else {
            state.factory = None;
            return;
        };

        match DriverHandler::global().get(handle) {
            Some(info) => self.release_init(handle, &info),
            None => error!(
                "close factory failed, missing handle entry for {}",
                self.file().display()
            ),
        }

        state.factory = None;
        close_handle(handle);
        state.handle = None;
    }

    /// Undo one init reference for `handle`: fini with the last one (unless
    /// no-delete clamps the count at 1), and drop the table entry after the
    /// init lock is released.
    fn release_init(&self, handle: RawHandle, info: &Arc<DriverHandlerInfo>) {
        let mut remove_entry = false;
        {
            let mut init_count = info.init.lock();
            *init_count -= 1;
            if *init_count == 0 {
                if self.desc.no_delete() {
                    *init_count += 1;
                } else {
                    if let Some(fini) = unsafe { resolve::<DriverFiniFn>(handle, DRIVER_FINI_SYMBOL) }
                    {
                        unsafe { fini() };
                    }
                    remove_entry = true;
                }
            }
        }

        if remove_entry {
            DriverHandler::global().remove(handle);
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("desc", &self.desc)
            .field("is_virtual", &self.is_virtual())
            .field("factory_count", &self.state.lock().factory_count)
            .finish()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        let file = self.file().to_path_buf();
        let state = self.state.get_mut();
        if state.factory_count != 0 {
            error!(
                "driver {} dropped with {} outstanding factory references",
                file.display(),
                state.factory_count
            );
            std::process::abort();
        }
    }
}

/// Shared handle to a driver's factory.
///
/// Dereferences to the factory; dropping it releases one factory reference
/// under the driver's mutex, so a holder must not drop it while holding that
/// mutex themselves.
pub struct DriverFactoryHandle {
    driver: Arc<Driver>,
    factory: ManuallyDrop<Arc<dyn DriverFactory>>,
}

impl fmt::Debug for DriverFactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFactoryHandle")
            .field("driver", &self.driver)
            .finish()
    }
}

impl DriverFactoryHandle {
    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub fn as_virtual_driver_manager(&self) -> Option<&dyn VirtualDriverManager> {
        self.factory.as_virtual_driver_manager()
    }
}

impl Deref for DriverFactoryHandle {
    type Target = dyn DriverFactory;

    fn deref(&self) -> &Self::Target {
        &**self.factory
    }
}

impl Drop for DriverFactoryHandle {
    fn drop(&mut self) {
        // The factory reference must die before the teardown closes the
        // library it points into.
        unsafe { ManuallyDrop::drop(&mut self.factory) };
        self.driver.close_factory();
    }
}

/// Loader flags for the descriptor's load options. Bindings always resolve
/// eagerly.
fn dlopen_mode(no_delete: bool, global: bool, deep_bind: bool) -> c_int {
    let mut mode = RTLD_NOW;
    if no_delete {
        mode |= libc::RTLD_NODELETE;
    }

    #[cfg(target_env = "gnu")]
    if deep_bind {
        mode |= libc::RTLD_DEEPBIND;
    }
    #[cfg(not(target_env = "gnu"))]
    let _ = deep_bind;

    if global {
        mode | RTLD_GLOBAL
    } else {
        mode | RTLD_LOCAL
    }
}

/// Look up `symbol` in the library behind `handle` without touching its
/// loader refcount.
unsafe fn resolve<T: Copy>(handle: RawHandle, symbol: &str) -> Option<T> {
    let library = ManuallyDrop::new(unsafe { Library::from_raw(handle.0) });
    unsafe { library.get::<T>(symbol.as_bytes()) }
        .ok()
        .map(|sym| *sym)
}

fn close_handle(handle: RawHandle) {
    // Dropping the reconstructed Library dlcloses the handle.
    drop(unsafe { Library::from_raw(handle.0) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlopen_mode_derives_loader_flags() {
        assert_eq!(dlopen_mode(false, false, false), RTLD_NOW | RTLD_LOCAL);
        assert_eq!(dlopen_mode(false, true, false), RTLD_NOW | RTLD_GLOBAL);
        assert_eq!(
            dlopen_mode(true, false, false),
            RTLD_NOW | libc::RTLD_NODELETE | RTLD_LOCAL
        );

        #[cfg(target_env = "gnu")]
        assert_eq!(
            dlopen_mode(false, false, true),
            RTLD_NOW | libc::RTLD_DEEPBIND | RTLD_LOCAL
        );
    }

    #[test]
    fn create_factory_on_missing_file_fails_clean() {
        let mut desc = DriverDesc::default();
        desc.set_class("cpu");
        desc.set_name("ghost");
        desc.set_file_path("/nonexistent/libmodelbox-ghost.so");

        let driver = Arc::new(Driver::new(desc));
        let err = driver.create_factory().unwrap_err();
        assert!(matches!(err, DriverError::Invalid(_)));

        let state = driver.state.lock();
        assert_eq!(state.factory_count, 0);
        assert!(state.handle.is_none());
        assert!(state.factory.is_none());
    }

    #[test]
    fn driver_starts_without_factory_or_virtual_mark() {
        let driver = Driver::new(DriverDesc::default());
        assert!(!driver.is_virtual());
        driver.set_virtual(true);
        assert!(driver.is_virtual());
        assert_eq!(driver.state.lock().factory_count, 0);
    }
}
