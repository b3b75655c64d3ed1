//! Virtual-class driver plugin fixture for the registry test suite.
//!
//! Its factory satisfies the manager capability set and enumerates one
//! synthetic driver per scan, which the registry absorbs like any other
//! virtual driver.

use modelbox_core::{
    Driver, DriverDesc, DriverFactory, DriverResult, Drivers, VirtualDriverManager,
    DRIVER_CLASS_VIRTUAL,
};
use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

struct VirtualUnitManager {
    drivers: Mutex<Vec<Arc<Driver>>>,
}

impl DriverFactory for VirtualUnitManager {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_virtual_driver_manager(&self) -> Option<&dyn VirtualDriverManager> {
        Some(self)
    }
}

impl VirtualDriverManager for VirtualUnitManager {
    fn init(&self, _drivers: &Drivers) -> DriverResult<()> {
        Ok(())
    }

    fn scan(&self, dirs: &[PathBuf]) -> DriverResult<()> {
        let mut desc = DriverDesc::default();
        desc.set_class("unit-virtual");
        desc.set_type("cpu");
        desc.set_name("virtual-unit-driver");
        desc.set_description("synthetic driver enumerated by the virtual fixture");
        let _ = desc.set_version("1.0.0");
        if let Some(dir) = dirs.first() {
            desc.set_file_path(dir.join("libmodelbox-virtual-unit.so"));
        }

        let driver = Arc::new(Driver::new(desc));
        driver.set_virtual(true);
        self.drivers.lock().unwrap().push(driver);
        Ok(())
    }

    fn drivers(&self) -> Vec<Arc<Driver>> {
        self.drivers.lock().unwrap().clone()
    }
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn DriverDescription(desc: *mut DriverDesc) {
    let desc = unsafe { &mut *desc };
    desc.set_class(DRIVER_CLASS_VIRTUAL);
    desc.set_type("virtual");
    desc.set_name("virtual-unit");
    desc.set_description("virtual driver fixture for registry tests");
    let _ = desc.set_version("1.0.0");
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn CreateDriverFactory() -> Box<dyn DriverFactory> {
    Box::new(VirtualUnitManager {
        drivers: Mutex::new(Vec::new()),
    })
}
