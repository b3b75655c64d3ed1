//! Plugin ABI and the factory traits a driver shared object exposes.
//!
//! Every driver plugin exports, with C linkage:
//!
//! ```rust,ignore
//! #[no_mangle]
//! pub extern "C" fn DriverDescription(desc: *mut DriverDesc) {
//!     let desc = unsafe { &mut *desc };
//!     desc.set_class("cpu");
//!     desc.set_type("x");
//!     desc.set_name("alpha");
//!     let _ = desc.set_version("1.0.0");
//! }
//!
//! #[no_mangle]
//! pub extern "C" fn CreateDriverFactory() -> Box<dyn DriverFactory> {
//!     Box::new(AlphaFactory)
//! }
//! ```
//!
//! `DriverInit` and `DriverFini` are optional; when present, init runs once
//! per process per library and fini once when the last user departs (unless
//! the descriptor requested no-delete).
//!
//! Plugins must be built with the same toolchain as the host; Rust types
//! cross this boundary the same way the runtime's other plugin seams do.

use crate::driver::descriptor::DriverDesc;
use crate::driver::loader::Driver;
use crate::driver::registry::Drivers;
use crate::error::DriverResult;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

/// Object exported by a plugin that constructs the driver's runtime
/// components.
///
/// The registry treats the factory as opaque apart from two capabilities:
/// downcasting to the concrete type, and the optional virtual-driver-manager
/// surface of `VIRTUAL`-class drivers.
pub trait DriverFactory: Send + Sync {
    /// Downcast surface for the concrete factory type.
    fn as_any(&self) -> &dyn Any;

    /// Present only on factories of driver-class `VIRTUAL`.
    fn as_virtual_driver_manager(&self) -> Option<&dyn VirtualDriverManager> {
        None
    }
}

/// Capability set of a `VIRTUAL`-class driver's factory.
///
/// Once loaded, a virtual driver enumerates further driver records that the
/// registry absorbs. The manager must outlive the drivers it produced; the
/// registry keeps it alive on a separate list for that reason.
pub trait VirtualDriverManager: Send + Sync {
    /// Prepare the manager against the registry it will extend.
    fn init(&self, drivers: &Drivers) -> DriverResult<()>;

    /// Enumerate drivers below the configured search directories.
    fn scan(&self, dirs: &[PathBuf]) -> DriverResult<()>;

    /// Drivers enumerated by the last `scan`, marked virtual.
    fn drivers(&self) -> Vec<Arc<Driver>>;
}

/// `DriverDescription` populates a descriptor with the plugin's identity.
#[allow(improper_ctypes_definitions)]
pub type DriverDescriptionFn = unsafe extern "C" fn(*mut DriverDesc);

/// `CreateDriverFactory` returns an owning handle to the plugin's factory.
#[allow(improper_ctypes_definitions)]
pub type CreateDriverFactoryFn = unsafe extern "C" fn() -> Box<dyn DriverFactory>;

/// `DriverInit` runs once per process per library, before the first factory.
#[allow(improper_ctypes_definitions)]
pub type DriverInitFn = unsafe extern "C" fn() -> DriverResult<()>;

/// `DriverFini` runs once after the last user departs.
pub type DriverFiniFn = unsafe extern "C" fn();

pub const DRIVER_DESCRIPTION_SYMBOL: &str = "DriverDescription";
pub const CREATE_DRIVER_FACTORY_SYMBOL: &str = "CreateDriverFactory";
pub const DRIVER_INIT_SYMBOL: &str = "DriverInit";
pub const DRIVER_FINI_SYMBOL: &str = "DriverFini";
