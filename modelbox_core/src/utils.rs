//! Internal helpers shared across the driver modules.

use crate::error::{DriverError, DriverResult};
use glob::Pattern;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// List the entries of `dir` whose file name matches `filter`, sorted by path.
pub(crate) fn list_files(dir: &Path, filter: &str) -> DriverResult<Vec<PathBuf>> {
    let pattern = Pattern::new(filter)
        .map_err(|err| DriverError::Invalid(format!("bad filter {}: {}", filter, err)))?;

    let entries = std::fs::read_dir(dir).map_err(|err| {
        DriverError::Fault(format!("list directory {} failed: {}", dir.display(), err))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if pattern.matches(name) {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Modification time of `path` in whole seconds, not following symlinks.
pub(crate) fn mtime_seconds(path: &Path) -> DriverResult<i64> {
    let meta = std::fs::symlink_metadata(path)?;
    Ok(meta.mtime())
}

/// Sort `list` and drop duplicate entries.
pub(crate) fn dedup(list: &mut Vec<String>) {
    list.sort();
    list.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn list_files_applies_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("libmodelbox-a.so"), b"x").unwrap();
        std::fs::write(dir.path().join("libmodelbox-b.so.1"), b"x").unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();

        let files = list_files(dir.path(), "libmodelbox-*.so*").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["libmodelbox-a.so", "libmodelbox-b.so.1"]);
    }

    #[test]
    fn list_files_missing_dir_is_fault() {
        let err = list_files(Path::new("/nonexistent-dir-for-test"), "*").unwrap_err();
        assert!(matches!(err, DriverError::Fault(_)));
    }

    #[test]
    fn dedup_removes_repeats() {
        let mut list = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        dedup(&mut list);
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn mtime_seconds_reads_plain_files() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(mtime_seconds(&file).unwrap() > 0);
        assert!(mtime_seconds(&dir.path().join("missing")).is_err());
    }
}
