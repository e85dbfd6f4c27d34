// projeto: lstmpetr4
// file: src/neural/storage.rs
// File-backed persistence for the trained model and the fitted scaler

use chrono::Utc;
use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::neural::metrics::RegressionMetrics;
use crate::neural::model::LstmModel;
use crate::neural::scaler::ScalerArtifact;
use crate::neural::utils::TrainingError;

/// Everything needed to serve predictions from a trained model. `scaler` is
/// the fitted scaler the model was trained against; the scaler file served
/// next to this model must equal it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub asset: String,
    pub timestamp: String,
    pub epochs_trained: usize,
    pub test_metrics: Option<RegressionMetrics>,
    pub scaler: ScalerArtifact,
    pub model: LstmModel,
}

impl ModelArtifact {
    pub fn new(
        asset: &str,
        scaler: ScalerArtifact,
        epochs_trained: usize,
        test_metrics: Option<RegressionMetrics>,
        model: LstmModel,
    ) -> Self {
        ModelArtifact {
            asset: asset.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            epochs_trained,
            test_metrics,
            scaler,
            model,
        }
    }
}

fn artifact_error(path: &Path, reason: impl ToString) -> TrainingError {
    TrainingError::Artifact {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Serializes `value` next to `path` and renames it into place, so readers
/// never observe a half-written file.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TrainingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| artifact_error(path, e))?;
    }

    let data = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, data).map_err(|e| artifact_error(path, e))?;
    fs::rename(&tmp, path).map_err(|e| artifact_error(path, e))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, TrainingError> {
    let data = fs::read(path).map_err(|e| artifact_error(path, e))?;
    serde_json::from_slice(&data).map_err(|e| artifact_error(path, e))
}

pub fn save_model(path: &Path, artifact: &ModelArtifact) -> Result<(), TrainingError> {
    info!("💾 [Storage] Saving model for {} to {}", artifact.asset, path.display());
    write_json(path, artifact)?;
    info!("✅ [Storage] Model saved ({} epochs, {} parameters)",
          artifact.epochs_trained, artifact.model.num_parameters());
    Ok(())
}

pub fn load_model(path: &Path) -> Result<ModelArtifact, TrainingError> {
    info!("📂 [Storage] Loading model from {}", path.display());
    let artifact: ModelArtifact = read_json(path)?;
    artifact.model.validate()
        .and_then(|_| artifact.scaler.validate())
        .map_err(|e| artifact_error(path, e))?;
    info!("✅ [Storage] Model for {} trained at {}", artifact.asset, artifact.timestamp);
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::model::{ModelBuilder, SequenceModel};
    use crate::neural::scaler::MinMaxScaler;
    use crate::neural::utils::make_rng;
    use ndarray::Array3;
    use tempfile::tempdir;

    #[test]
    fn test_model_round_trip_preserves_predictions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("lstm.json");
        let model = ModelBuilder::new(6).hidden_size(5).build(&mut make_rng(Some(42))).unwrap();
        let scaler = MinMaxScaler::fit(&[21.37, 38.02]).unwrap();
        let artifact = ModelArtifact::new("PETR4.SA", scaler, 0, None, model);

        save_model(&path, &artifact).unwrap();
        let loaded = load_model(&path).unwrap();

        assert_eq!(loaded, artifact);
        assert_eq!(loaded.scaler, scaler);
        let x = Array3::from_shape_fn((2, 6, 1), |(n, t, _)| 0.3 + 0.05 * (n + t) as f64);
        assert_eq!(loaded.model.predict(&x), artifact.model.predict(&x));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_artifact_error() {
        let dir = tempdir().unwrap();
        let err = load_model(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, TrainingError::Artifact { .. }));
    }

    #[test]
    fn test_load_corrupt_file_is_artifact_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{\"asset\": \"PETR4.SA\", \"model\": ").unwrap();
        assert!(matches!(load_model(&path), Err(TrainingError::Artifact { .. })));
    }

    #[test]
    fn test_overwrite_replaces_previous_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lstm.json");
        let mut rng = make_rng(Some(1));
        let scaler = MinMaxScaler::fit(&[20.0, 40.0]).unwrap();
        let first = ModelArtifact::new("PETR4.SA", scaler, 1, None, ModelBuilder::new(4).hidden_size(2).build(&mut rng).unwrap());
        let second = ModelArtifact::new("PETR4.SA", scaler, 2, None, ModelBuilder::new(4).hidden_size(2).build(&mut rng).unwrap());

        save_model(&path, &first).unwrap();
        save_model(&path, &second).unwrap();
        assert_eq!(load_model(&path).unwrap().epochs_trained, 2);
    }
}
