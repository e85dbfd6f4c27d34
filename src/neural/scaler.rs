// projeto: lstmpetr4
// file: src/neural/scaler.rs
// Min-max scaling of close prices into [0, 1] and its persisted artifact

use ndarray::ArrayView1;
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::neural::storage::{read_json, write_json};
use crate::neural::utils::TrainingError;

/// Fitted min/max of the training prices. Fully determines the scaling in
/// both directions, so the serving side needs nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub data_min: f64,
    pub data_max: f64,
    pub feature_range: (f64, f64),
}

pub struct MinMaxScaler;

impl MinMaxScaler {
    pub const FEATURE_RANGE: (f64, f64) = (0.0, 1.0);

    pub fn fit(values: &[f64]) -> Result<ScalerArtifact, TrainingError> {
        let view = ArrayView1::from(values);
        let data_min = *view.min()
            .map_err(|e| TrainingError::DataProcessing(format!("Cannot fit scaler: {}", e)))?;
        let data_max = *view.max()
            .map_err(|e| TrainingError::DataProcessing(format!("Cannot fit scaler: {}", e)))?;

        if !data_min.is_finite() || !data_max.is_finite() {
            return Err(TrainingError::DataProcessing(
                "Cannot fit scaler on non-finite prices".to_string()
            ));
        }
        if data_max == data_min {
            return Err(TrainingError::DegenerateScale { value: data_min });
        }

        Ok(ScalerArtifact { data_min, data_max, feature_range: Self::FEATURE_RANGE })
    }
}

impl ScalerArtifact {
    fn span(&self) -> f64 {
        self.data_max - self.data_min
    }

    pub fn transform_value(&self, value: f64) -> f64 {
        let (lo, hi) = self.feature_range;
        (value - self.data_min) / self.span() * (hi - lo) + lo
    }

    pub fn inverse_transform_value(&self, scaled: f64) -> f64 {
        let (lo, hi) = self.feature_range;
        (scaled - lo) / (hi - lo) * self.span() + self.data_min
    }

    /// Values outside the fitted range map outside `feature_range`; nothing is clipped.
    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform_value(v)).collect()
    }

    pub fn inverse_transform(&self, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|&v| self.inverse_transform_value(v)).collect()
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let (lo, hi) = self.feature_range;
        let finite = [self.data_min, self.data_max, lo, hi].iter().all(|v| v.is_finite());
        if !finite || self.data_max <= self.data_min || self.feature_range != MinMaxScaler::FEATURE_RANGE {
            return Err(TrainingError::Serialization(format!(
                "Invalid scaler parameters: min={}, max={}, range=({}, {})",
                self.data_min, self.data_max, lo, hi
            )));
        }
        Ok(())
    }

    pub fn persist(&self, path: &Path) -> Result<(), TrainingError> {
        write_json(path, self)?;
        log::info!("💾 [Scaler] Saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrainingError> {
        let artifact: ScalerArtifact = read_json(path)?;
        artifact.validate().map_err(|e| TrainingError::Artifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(artifact)
    }
}
