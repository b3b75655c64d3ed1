//! Driver plugin fixture for the registry test suite.
//!
//! The test process steers the fixture through environment variables:
//!
//! - `MODELBOX_UNIT_DRIVER_STATE`: file that `DriverInit`/`DriverFini` append
//!   an `init`/`fini` line to, so tests can observe lifecycle transitions
//!   even after the library is unloaded.
//! - `MODELBOX_UNIT_DRIVER_VERSION`: descriptor version, default `1.0.0`.
//! - `MODELBOX_UNIT_DRIVER_NODELETE`: `1` requests the no-delete load option.
//! - `MODELBOX_UNIT_DRIVER_FAIL_INIT`: `1` makes `DriverInit` fail.

use modelbox_core::{DriverDesc, DriverError, DriverFactory, DriverResult};
use std::any::Any;
use std::fs::OpenOptions;
use std::io::Write;

fn record(event: &str) {
    let Ok(path) = std::env::var("MODELBOX_UNIT_DRIVER_STATE") else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{event}");
    }
}

struct UnitDriverFactory;

impl DriverFactory for UnitDriverFactory {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn DriverDescription(desc: *mut DriverDesc) {
    let desc = unsafe { &mut *desc };
    desc.set_class("unit");
    desc.set_type("cpu");
    desc.set_name("unit-driver");
    desc.set_description("driver fixture for registry tests");

    let version =
        std::env::var("MODELBOX_UNIT_DRIVER_VERSION").unwrap_or_else(|_| "1.0.0".to_string());
    let _ = desc.set_version(&version);

    if std::env::var("MODELBOX_UNIT_DRIVER_NODELETE").as_deref() == Ok("1") {
        desc.set_no_delete(true);
    }
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn DriverInit() -> DriverResult<()> {
    record("init");
    if std::env::var("MODELBOX_UNIT_DRIVER_FAIL_INIT").as_deref() == Ok("1") {
        return Err(DriverError::Fault(
            "unit driver init forced failure".to_string(),
        ));
    }
    Ok(())
}

#[no_mangle]
pub extern "C" fn DriverFini() {
    record("fini");
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn CreateDriverFactory() -> Box<dyn DriverFactory> {
    Box::new(UnitDriverFactory)
}
