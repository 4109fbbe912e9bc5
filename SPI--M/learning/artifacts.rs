use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::LearningError, models::Estimator, preprocessing::FittedPipeline};

/// Persisted fitted estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Version tag the artifact was saved under.
    pub version_tag: String,
    /// Configured model name.
    pub model_name: String,
    /// Fit time.
    pub trained_at: DateTime<Utc>,
    /// Transformed feature names, in matrix column order.
    pub feature_names: Vec<String>,
    /// Fitted estimator.
    pub estimator: Estimator,
}

/// Persisted fitted feature pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorArtifact {
    /// Version tag the artifact was saved under.
    pub version_tag: String,
    /// Target the paired model predicts.
    pub target_col: String,
    /// Frozen pipeline.
    pub pipeline: FittedPipeline,
}

/// Serializes `value` as pretty JSON next to `path`, then renames it into
/// place. Readers see either the previous file or the complete new one.
pub fn save_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), LearningError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(LearningError::io(parent))?;

    let file_name = path
        .file_name()
        .map_or_else(|| "artifact".into(), |name| name.to_string_lossy());
    let tmp: PathBuf = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    let bytes = serde_json::to_vec_pretty(value)?;
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(&bytes)?;
        file.sync_all()
    });
    if let Err(source) = written {
        let _ = fs::remove_file(&tmp);
        return Err(LearningError::Io { path: tmp, source });
    }
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        LearningError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Reads a JSON artifact or report.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, LearningError> {
    let bytes = fs::read(path).map_err(LearningError::io(path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl ModelArtifact {
    /// Loads a model artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LearningError> {
        load_json(path.as_ref())
    }
}

impl PreprocessorArtifact {
    /// Loads a preprocessor artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LearningError> {
        load_json(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn atomic_save_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/model_v1.json");
        save_json_atomic(&path, &json!({ "v": 1 })).unwrap();
        save_json_atomic(&path, &json!({ "v": 2 })).unwrap();

        let loaded: Value = load_json(&path).unwrap();
        assert_eq!(loaded["v"], 2);
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_artifact_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = ModelArtifact::load(&path).unwrap_err();
        assert!(matches!(err, LearningError::Io { path: ref p, .. } if p == &path));
        assert!(err.to_string().contains("absent.json"));
    }
}
