//! Runtime configuration for the driver registry.
//!
//! The registry reads a `[driver]` section from the runtime's YAML
//! configuration file:
//!
//! ```yaml
//! driver:
//!   dir:
//!     - /opt/modelbox/drivers
//!     - /home/user/.modelbox/drivers
//!   skip_default_path: false
//! ```
//!
//! `driver.dir` lists the search directories; `driver.skip_default_path`
//! suppresses the built-in default path when set.

use crate::error::DriverResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Driver registry settings
    pub driver: DriverConfig,

    /// Additional configuration sections owned by other subsystems
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

/// The `driver` configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Search directories for driver shared objects
    pub dir: Vec<PathBuf>,

    /// Do not append the built-in default driver path
    pub skip_default_path: bool,
}

impl RuntimeConfig {
    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> DriverResult<Self> {
        serde_yaml::from_str(content).map_err(Into::into)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> DriverResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
