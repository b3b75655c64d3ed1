//! # ModelBox core
//!
//! Core runtime pieces of the modelbox dataflow system. The crate currently
//! hosts the dynamic driver registry: discovery, validation, and lifecycle of
//! the shared-object plugins the runtime instantiates components from.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use modelbox_core::{Drivers, RuntimeConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> modelbox_core::DriverResult<()> {
//! let config = RuntimeConfig::from_yaml("driver:\n  dir: [/opt/modelbox/drivers]")?;
//! let drivers = Drivers::global();
//! drivers.initialize(Arc::new(config))?;
//! drivers.scan()?;
//!
//! if let Some(driver) = drivers.get_driver("cpu", "flowunit", "resize", "") {
//!     let factory = driver.create_factory()?;
//!     // hand the factory to the component builder
//!     drop(factory);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub(crate) mod utils;

pub use config::{DriverConfig, RuntimeConfig};
pub use driver::{
    Driver, DriverDesc, DriverFactory, DriverFactoryHandle, Drivers, ForkRunner, InlineRunner,
    ScanDriverEntry, ScanInfo, SubprocessRunner, VirtualDriverManager, DEFAULT_DRIVER_PATH,
    DEFAULT_LD_CACHE, DEFAULT_SCAN_INFO, DRIVER_CLASS_VIRTUAL, DRIVER_FILE_FILTER,
};
pub use error::{DriverError, DriverResult};
