//! Persisted record of a driver scan.
//!
//! The cold-scan child writes the manifest; the trusted parent later rebuilds
//! its driver list from it without executing any plugin code. Validity across
//! restarts hinges on the check code (a digest over the accumulated plugin
//! mtime sum) together with the dynamic-linker cache timestamp.

use crate::error::{DriverError, DriverResult};
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// On-disk manifest of one completed scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanInfo {
    /// Modification seconds of the dynamic-linker cache at scan time
    pub ld_cache_time: i64,

    /// Digest over the accumulated plugin mtime sum
    pub check_code: String,

    /// Human-readable date of the scan
    pub version_record: String,

    /// One entry per probed file
    pub scan_drivers: Vec<ScanDriverEntry>,
}

/// A probed file: either a full descriptor or a recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanDriverEntry {
    Success {
        class: String,
        #[serde(rename = "type")]
        driver_type: String,
        name: String,
        description: String,
        version: String,
        file_path: PathBuf,
        no_delete: bool,
        global: bool,
        deep_bind: bool,
        load_success: bool,
    },
    Failure {
        file_path: PathBuf,
        err_msg: String,
        load_success: bool,
    },
}

impl ScanInfo {
    pub fn read(path: &Path) -> DriverResult<Self> {
        let file = std::fs::File::open(path).map_err(|err| {
            DriverError::Fault(format!("open {} for read failed: {}", path.display(), err))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(Into::into)
    }

    pub fn write(&self, path: &Path) -> DriverResult<()> {
        let file = std::fs::File::create(path).map_err(|err| {
            DriverError::Fault(format!("open {} for write failed: {}", path.display(), err))
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Stable digest over the accumulated mtime sum.
pub(crate) fn generate_check_code(mtime_sum: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mtime_sum.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn version_record_now() -> String {
    Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ScanInfo {
        ScanInfo {
            ld_cache_time: 1690000000,
            check_code: generate_check_code(42),
            version_record: version_record_now(),
            scan_drivers: vec![
                ScanDriverEntry::Success {
                    class: "cpu".to_string(),
                    driver_type: "x".to_string(),
                    name: "alpha".to_string(),
                    description: "demo".to_string(),
                    version: "1.0.0".to_string(),
                    file_path: PathBuf::from("/p/libmodelbox-alpha.so"),
                    no_delete: false,
                    global: false,
                    deep_bind: true,
                    load_success: true,
                },
                ScanDriverEntry::Failure {
                    file_path: PathBuf::from("/p/libmodelbox-broken.so"),
                    err_msg: "invalid: dlopen failed".to_string(),
                    load_success: false,
                },
            ],
        }
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan-info.json");

        let info = sample();
        info.write(&path).unwrap();
        let read = ScanInfo::read(&path).unwrap();

        assert_eq!(read.ld_cache_time, info.ld_cache_time);
        assert_eq!(read.check_code, info.check_code);
        assert_eq!(read.scan_drivers.len(), 2);
        assert!(matches!(
            read.scan_drivers[0],
            ScanDriverEntry::Success { ref name, .. } if name == "alpha"
        ));
        assert!(matches!(
            read.scan_drivers[1],
            ScanDriverEntry::Failure { ref err_msg, .. } if err_msg.contains("dlopen")
        ));
    }

    #[test]
    fn entry_variant_follows_field_shape() {
        let json = r#"{
            "ld_cache_time": 0,
            "check_code": "c",
            "version_record": "d",
            "scan_drivers": [
                {"file_path": "/p/x.so", "err_msg": "boom", "load_success": false}
            ]
        }"#;
        let info: ScanInfo = serde_json::from_str(json).unwrap();
        assert!(matches!(info.scan_drivers[0], ScanDriverEntry::Failure { .. }));
    }

    #[test]
    fn read_missing_file_is_fault() {
        let err = ScanInfo::read(Path::new("/nonexistent/scan-info.json")).unwrap_err();
        assert!(matches!(err, DriverError::Fault(_)));
    }

    #[test]
    fn check_code_is_stable_and_collision_visible() {
        assert_eq!(generate_check_code(42), generate_check_code(42));
        assert_ne!(generate_check_code(42), generate_check_code(43));
        assert_eq!(generate_check_code(0).len(), 64);
    }
}
