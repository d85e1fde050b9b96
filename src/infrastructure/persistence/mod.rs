//! On-disk artifacts: datasets (CSV + feature sidecar), models and reports (JSON).
//!
//! Every file is written to a temp sibling first and then renamed into place.

pub mod dataset_store;
pub mod model_store;

use crate::domain::errors::{PipelineError, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use dataset_store::{DatasetStore, features_path};
pub use model_store::{load_json, report_path, save_json};

/// Atomic write: write to temp file then rename
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let temp_path = temp_sibling(path);
    fs::write(&temp_path, content).map_err(|e| PipelineError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        write_atomic(&path, b"{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!temp_sibling(&path).exists());
    }
}
