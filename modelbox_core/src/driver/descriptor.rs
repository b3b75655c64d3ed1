//! Driver descriptor: the identity and load options of one discovered plugin.

use crate::error::{DriverError, DriverResult};
use log::error;
use std::path::{Path, PathBuf};

/// Metadata describing a driver shared object.
///
/// A plugin populates the descriptor through its `DriverDescription` export;
/// the registry then owns it for the lifetime of the driver record. The
/// identity of a driver is the tuple `(class, type, name, description,
/// version)`; the file path and the load flags are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverDesc {
    driver_class: String,
    driver_type: String,
    driver_name: String,
    driver_description: String,
    driver_version: String,
    file_path: PathBuf,
    no_delete: bool,
    global: bool,
    deep_bind: bool,
}

impl DriverDesc {
    pub fn class(&self) -> &str {
        &self.driver_class
    }

    pub fn driver_type(&self) -> &str {
        &self.driver_type
    }

    pub fn name(&self) -> &str {
        &self.driver_name
    }

    pub fn description(&self) -> &str {
        &self.driver_description
    }

    pub fn version(&self) -> &str {
        &self.driver_version
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Pin the library in memory for the process lifetime and suppress
    /// `DriverFini`.
    pub fn no_delete(&self) -> bool {
        self.no_delete
    }

    /// Resolve the library's symbols into the global namespace.
    pub fn global(&self) -> bool {
        self.global
    }

    /// Prefer the library's own symbols over global ones.
    pub fn deep_bind(&self) -> bool {
        self.deep_bind
    }

    pub fn set_class<S: Into<String>>(&mut self, class: S) {
        self.driver_class = class.into();
    }

    pub fn set_type<S: Into<String>>(&mut self, driver_type: S) {
        self.driver_type = driver_type.into();
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.driver_name = name.into();
    }

    pub fn set_description<S: Into<String>>(&mut self, description: S) {
        self.driver_description = description.into();
    }

    /// Set the version string.
    ///
    /// The empty string is accepted and means "unversioned". Anything else
    /// must be of the form `x.y.z` with all-digit segments; other forms are
    /// rejected with `BadConfig` and the stored version is left unchanged.
    pub fn set_version(&mut self, version: &str) -> DriverResult<()> {
        if version.is_empty() {
            return Ok(());
        }

        check_version(version).inspect_err(|_| {
            error!(
                "set version failed, the version model is x.y.z (xyz should be integer), version is: {}",
                version
            );
        })?;

        self.driver_version = version.to_string();
        Ok(())
    }

    pub fn set_file_path<P: Into<PathBuf>>(&mut self, file_path: P) {
        self.file_path = file_path.into();
    }

    pub fn set_no_delete(&mut self, no_delete: bool) {
        self.no_delete = no_delete;
    }

    pub fn set_global(&mut self, global: bool) {
        self.global = global;
    }

    pub fn set_deep_bind(&mut self, deep_bind: bool) {
        self.deep_bind = deep_bind;
    }

    /// Whether `other` names the same driver identity.
    pub fn same_identity(&self, other: &DriverDesc) -> bool {
        self.driver_class == other.driver_class
            && self.driver_type == other.driver_type
            && self.driver_name == other.driver_name
            && self.driver_description == other.driver_description
            && self.driver_version == other.driver_version
    }
}

fn check_version(version: &str) -> DriverResult<()> {
    let segments: Vec<&str> = version.split('.').collect();
    if segments.len() != 3 {
        return Err(DriverError::BadConfig("version is invalid".to_string()));
    }

    for segment in segments {
        if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_digit()) {
            return Err(DriverError::BadConfig("version is invalid".to_string()));
        }
    }

    Ok(())
}
