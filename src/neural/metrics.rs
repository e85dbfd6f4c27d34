// projeto: lstmpetr4
// file: src/neural/metrics.rs
// Per-epoch training history and regression metrics in price units

use log::info;
use serde::{Deserialize, Serialize};

use crate::neural::utils::TrainingError;

/// Losses for one epoch, all on the scaled series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub mae: f64,
    pub val_loss: f64,
    pub val_mae: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsTracker {
    pub history: Vec<EpochMetrics>,
    pub best_val_loss: Option<f64>,
    pub best_epoch: usize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        MetricsTracker::default()
    }

    pub fn record(&mut self, metrics: EpochMetrics) {
        let improved = self.best_val_loss.is_none_or(|best| metrics.val_loss < best);
        if improved {
            self.best_val_loss = Some(metrics.val_loss);
            self.best_epoch = metrics.epoch;
        }
        self.history.push(metrics);
    }

    pub fn latest(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }

    pub fn print_summary(&self) {
        if let (Some(best), Some(last)) = (self.best_val_loss, self.latest()) {
            info!("📈 [Metrics] Training Summary:");
            info!("   ├── Epochs: {}", self.history.len());
            info!("   ├── Best Val Loss: {:.6} (epoch {})", best, self.best_epoch);
            info!("   ├── Final Loss: {:.6}", last.loss);
            info!("   └── Final Val MAE: {:.6}", last.val_mae);
        }
    }
}

/// Errors of inverse-transformed predictions against actual prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub n_samples: usize,
}

impl RegressionMetrics {
    pub fn calculate(predictions: &[f64], targets: &[f64]) -> Result<Self, TrainingError> {
        if predictions.len() != targets.len() {
            return Err(TrainingError::Shape(format!(
                "{} predictions for {} targets", predictions.len(), targets.len()
            )));
        }
        if predictions.is_empty() {
            return Err(TrainingError::DataProcessing("no samples to evaluate".to_string()));
        }

        let n = predictions.len() as f64;
        let pairs = || predictions.iter().zip(targets.iter());

        let mse = pairs().map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n;
        let mae = pairs().map(|(p, t)| (p - t).abs()).sum::<f64>() / n;

        let nonzero = pairs().filter(|(_, t)| **t != 0.0).count();
        let mape = if nonzero == 0 {
            0.0
        } else {
            pairs()
                .filter(|(_, t)| **t != 0.0)
                .map(|(p, t)| ((p - t) / t).abs())
                .sum::<f64>() / nonzero as f64 * 100.0
        };

        Ok(RegressionMetrics {
            rmse: mse.sqrt(),
            mae,
            mape,
            n_samples: predictions.len(),
        })
    }

    pub fn print(&self, prefix: &str) {
        info!("📊 [{}] Regression Metrics:", prefix);
        info!("   ├── Samples: {}", self.n_samples);
        info!("   ├── RMSE: R$ {:.4}", self.rmse);
        info!("   ├── MAE: R$ {:.4}", self.mae);
        info!("   └── MAPE: {:.2}%", self.mape);
    }
}
