// projeto: lstmpetr4
// file: src/neural/utils.rs
// Error handling, Adam optimizer and numeric helpers shared by the training pipeline

use ndarray::{Array, Array2, ArrayD, Dimension, IxDyn, ShapeError, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::neural::data::ProviderError;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Market data provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Degenerate scale: every fitted price equals {value}")]
    DegenerateScale { value: f64 },

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Artifact error at {path}: {reason}")]
    Artifact { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shape error: {0}")]
    Shape(String),
}

impl From<ShapeError> for TrainingError {
    fn from(err: ShapeError) -> Self {
        TrainingError::Shape(err.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(err: serde_json::Error) -> Self {
        TrainingError::Serialization(err.to_string())
    }
}

/// Adam with bias correction. Moments are keyed by parameter name and kept
/// in a sorted map so the serialized optimizer state is stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: BTreeMap<String, ArrayD<f64>>,
    v: BTreeMap<String, ArrayD<f64>>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        AdamOptimizer {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: BTreeMap::new(),
            v: BTreeMap::new(),
        }
    }

    /// Advances the step counter. Call once per batch, before the parameter updates of that batch.
    pub fn next_step(&mut self) {
        self.t += 1;
    }

    /// Applies one Adam update to `param` in place.
    pub fn update<D: Dimension>(&mut self, param_name: &str, param: &mut Array<f64, D>, gradient: &Array<f64, D>) {
        let t = self.t.max(1) as i32;
        let (lr, beta1, beta2, epsilon) = (self.learning_rate, self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);

        let shape = IxDyn(gradient.shape());
        let m = self.m.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(shape.clone()));
        let v = self.v.entry(param_name.to_string())
            .or_insert_with(|| ArrayD::zeros(shape));

        Zip::from(param.view_mut().into_dyn())
            .and(m)
            .and(v)
            .and(gradient.view().into_dyn())
            .for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + epsilon);
            });
    }

    pub fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }
}

/// Seeded generator in development, OS entropy otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

pub fn sigmoid_scalar(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub fn mse_loss(predictions: &[f64], targets: &[f64]) -> f64 {
    assert_eq!(predictions.len(), targets.len());
    let n = predictions.len() as f64;
    predictions.iter().zip(targets.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>() / n
}

pub fn mae_loss(predictions: &[f64], targets: &[f64]) -> f64 {
    assert_eq!(predictions.len(), targets.len());
    let n = predictions.len() as f64;
    predictions.iter().zip(targets.iter())
        .map(|(p, t)| (p - t).abs())
        .sum::<f64>() / n
}

/// Glorot uniform initialization for a `[rows, cols]` kernel.
pub fn glorot_uniform(rows: usize, cols: usize, rng: &mut StdRng) -> Result<Array2<f64>, TrainingError> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    let dist = Uniform::new(-limit, limit)
        .map_err(|e| TrainingError::ModelConfiguration(format!("Invalid init range: {}", e)))?;
    Ok(Array2::from_shape_fn((rows, cols), |_| dist.sample(rng)))
}

/// Matrix with orthonormal columns (or rows, when `rows < cols`), built by
/// Gram-Schmidt on a standard-normal draw.
pub fn orthogonal(rows: usize, cols: usize, rng: &mut StdRng) -> Result<Array2<f64>, TrainingError> {
    let (tall, narrow) = (rows.max(cols), rows.min(cols));
    let mut q: Array2<f64> = Array2::from_shape_fn((tall, narrow), |_| StandardNormal.sample(rng));

    for j in 0..narrow {
        for k in 0..j {
            let projection = q.column(k).dot(&q.column(j));
            let basis = q.column(k).to_owned();
            q.column_mut(j).scaled_add(-projection, &basis);
        }
        let norm = q.column(j).dot(&q.column(j)).sqrt();
        if !(norm > 1e-12) {
            return Err(TrainingError::ModelConfiguration(
                "degenerate draw in orthogonal init".to_string()
            ));
        }
        q.column_mut(j).mapv_inplace(|v| v / norm);
    }

    Ok(if rows < cols { q.reversed_axes() } else { q })
}

pub fn validate_targets(targets: &[f64], name: &str) -> Result<(), TrainingError> {
    if targets.is_empty() {
        return Err(TrainingError::DataProcessing(format!("{} is empty", name)));
    }

    for (i, &value) in targets.iter().enumerate() {
        if value.is_nan() {
            return Err(TrainingError::DataProcessing(
                format!("{} contains NaN at position {}", name, i)
            ));
        }
        if value.is_infinite() {
            return Err(TrainingError::DataProcessing(
                format!("{} contains infinite value at position {}", name, i)
            ));
        }
    }

    Ok(())
}
