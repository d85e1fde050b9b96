use super::write_atomic;
use crate::domain::errors::{PipelineError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &content)?;
    info!("Saved {:?}", path);
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let value = serde_json::from_slice(&content)?;
    info!("Loaded {:?}", path);
    Ok(value)
}

/// `models/direction.json` -> `models/direction_report.json`
pub fn report_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    model_path.with_file_name(format!("{}_report.json", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_report_path_sits_beside_model() {
        assert_eq!(
            report_path(Path::new("models/direction.json")),
            PathBuf::from("models/direction_report.json")
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");
        let mut scores = BTreeMap::new();
        scores.insert("auc".to_string(), vec![0.61, 0.58]);

        save_json(&scores, &path).unwrap();
        let loaded: BTreeMap<String, Vec<f64>> = load_json(&path).unwrap();
        assert_eq!(loaded, scores);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_json::<Vec<f64>>(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
