//! # Dynamic driver registry
//!
//! Drivers are shared-object plugins discovered below configured search
//! directories. Discovery is a two-phase scan: the potentially unsafe first
//! load of every candidate runs in a child process and is persisted as a
//! manifest; the trusted parent rebuilds its registry from the manifest
//! without executing plugin code, gated by a freshness check over plugin
//! mtimes and the dynamic-linker cache.
//!
//! ```text
//!  config ──► Drivers::initialize ──► Drivers::scan
//!                                        │
//!                    fresh manifest? ────┤
//!                     │ no               │ yes
//!                     ▼                  │
//!              subprocess inner_scan     │
//!              (dlopen probe + manifest) │
//!                     │                  │
//!                     ▼                  ▼
//!                  gather_scan_info (no plugin code)
//!                          │
//!                          ▼
//!                  virtual_driver_scan (expand VIRTUAL drivers)
//! ```
//!
//! At steady state component instantiation goes through
//! [`Driver::create_factory`], the only path that dlopens user plugins.
//!
//! ## Key types
//!
//! - [`DriverDesc`]: identity and load options of one plugin
//! - [`Driver`]: one record per discovered plugin file
//! - [`Drivers`]: the process-global registry façade
//! - [`DriverFactory`] / [`VirtualDriverManager`]: the plugin-side contracts
//! - [`ScanInfo`]: the persisted manifest
//! - [`SubprocessRunner`]: isolation seam for the first-load pass

pub mod descriptor;
pub(crate) mod handle;
pub mod loader;
pub mod registry;
pub mod scan_info;
pub mod subprocess;
pub mod traits;

pub use descriptor::DriverDesc;
pub use loader::{Driver, DriverFactoryHandle};
pub use registry::{
    Drivers, DEFAULT_DRIVER_PATH, DEFAULT_LD_CACHE, DEFAULT_SCAN_INFO, DRIVER_CLASS_VIRTUAL,
    DRIVER_FILE_FILTER,
};
pub use scan_info::{ScanDriverEntry, ScanInfo};
pub use subprocess::{ForkRunner, InlineRunner, SubprocessRunner};
pub use traits::{
    CreateDriverFactoryFn, DriverDescriptionFn, DriverFactory, DriverFiniFn, DriverInitFn,
    VirtualDriverManager, CREATE_DRIVER_FACTORY_SYMBOL, DRIVER_DESCRIPTION_SYMBOL,
    DRIVER_FINI_SYMBOL, DRIVER_INIT_SYMBOL,
};
