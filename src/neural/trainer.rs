// projeto: lstmpetr4
// file: src/neural/trainer.rs
// Mini-batch training loop, held-out evaluation and the end-to-end training job

use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;

use rand::rngs::StdRng;

use crate::neural::data::MarketDataProvider;
use crate::neural::metrics::{EpochMetrics, MetricsTracker, RegressionMetrics};
use crate::neural::model::{LstmModel, ModelBuilder, ModelConfig, SequenceModel};
use crate::neural::pipeline::{DataPipeline, DatasetSplit, PipelineConfig};
use crate::neural::scaler::ScalerArtifact;
use crate::neural::storage::{save_model, ModelArtifact};
use crate::neural::utils::{mae_loss, make_rng, mse_loss, TrainingError};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig { epochs: 20, batch_size: 64 }
    }
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Trainer { config }
    }

    /// Fixed number of epochs over the training samples in chronological
    /// order (no shuffling), scoring the test samples after each epoch.
    pub fn fit(&self, model: &mut LstmModel, split: &DatasetSplit, rng: &mut StdRng) -> Result<MetricsTracker, TrainingError> {
        if self.config.epochs == 0 || self.config.batch_size == 0 {
            return Err(TrainingError::ModelConfiguration(
                "epochs and batch_size must be positive".to_string()
            ));
        }
        let n_train = split.train_len();
        if n_train == 0 {
            return Err(TrainingError::DataUnavailable("no training samples".to_string()));
        }
        if split.x_train.shape()[1] != model.window() {
            return Err(TrainingError::Shape(format!(
                "training windows have length {}, model expects {}",
                split.x_train.shape()[1], model.window()
            )));
        }

        info!("🚀 [Trainer] {} epochs, batch size {}, {} train / {} test samples",
              self.config.epochs, self.config.batch_size, n_train, split.test_len());

        let order: Vec<usize> = (0..n_train).collect();
        let mut tracker = MetricsTracker::new();

        for epoch in 1..=self.config.epochs {
            let started = Instant::now();
            let mut squared = 0.0;
            let mut absolute = 0.0;

            for batch in order.chunks(self.config.batch_size) {
                let outcome = model.train_batch(&split.x_train, &split.y_train, batch, rng)?;
                squared += outcome.squared_error;
                absolute += outcome.absolute_error;
            }

            let (val_loss, val_mae) = Self::score(model, split)?;
            let metrics = EpochMetrics {
                epoch,
                loss: squared / n_train as f64,
                mae: absolute / n_train as f64,
                val_loss,
                val_mae,
            };

            info!("📈 Epoch {}/{} - loss: {:.6} - mae: {:.6} - val_loss: {:.6} - val_mae: {:.6} ({:.2}s)",
                  epoch, self.config.epochs, metrics.loss, metrics.mae,
                  metrics.val_loss, metrics.val_mae, started.elapsed().as_secs_f64());
            tracker.record(metrics);
        }

        tracker.print_summary();
        Ok(tracker)
    }

    fn score(model: &LstmModel, split: &DatasetSplit) -> Result<(f64, f64), TrainingError> {
        if split.test_len() == 0 {
            return Ok((f64::NAN, f64::NAN));
        }
        let predictions = model.predict(&split.x_test).to_vec();
        let targets = split.y_test.to_vec();
        let val_loss = mse_loss(&predictions, &targets);
        if !val_loss.is_finite() {
            return Err(TrainingError::Training("non-finite validation loss".to_string()));
        }
        Ok((val_loss, mae_loss(&predictions, &targets)))
    }

    /// Scores test predictions in price units after inverse scaling.
    pub fn evaluate<M: SequenceModel + ?Sized>(
        model: &M,
        split: &DatasetSplit,
        scaler: &ScalerArtifact,
    ) -> Result<RegressionMetrics, TrainingError> {
        let predictions = scaler.inverse_transform(&model.predict(&split.x_test).to_vec());
        let actual = scaler.inverse_transform(&split.y_test.to_vec());
        debug!("Evaluating {} test predictions", predictions.len());
        RegressionMetrics::calculate(&predictions, &actual)
    }
}

/// Everything one training run needs.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub pipeline: PipelineConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub model_path: PathBuf,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: Vec<EpochMetrics>,
    pub test_metrics: RegressionMetrics,
    pub series_len: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub model_path: PathBuf,
}

/// Fetch, prepare, build, train, evaluate and persist. Any failure aborts
/// the run before a model artifact is written.
pub fn run_training(job: &TrainingJob, provider: &dyn MarketDataProvider) -> Result<TrainingReport, TrainingError> {
    if job.model.window != job.pipeline.window {
        return Err(TrainingError::ModelConfiguration(format!(
            "model window {} differs from pipeline window {}",
            job.model.window, job.pipeline.window
        )));
    }

    let mut rng = make_rng(job.seed);
    let data = DataPipeline::new(provider).run(&job.pipeline)?;

    let mut model = ModelBuilder::from_config(job.model.clone()).build(&mut rng)?;
    let trainer = Trainer::new(job.training.clone());
    let tracker = trainer.fit(&mut model, &data.split, &mut rng)?;

    let test_metrics = Trainer::evaluate(&model, &data.split, &data.scaler)?;
    test_metrics.print("Test");

    let artifact = ModelArtifact::new(
        &job.pipeline.ticker,
        data.scaler,
        tracker.history.len(),
        Some(test_metrics),
        model,
    );
    save_model(&job.model_path, &artifact)?;

    Ok(TrainingReport {
        history: tracker.history,
        test_metrics,
        series_len: data.series_len,
        train_samples: data.split.train_len(),
        test_samples: data.split.test_len(),
        model_path: job.model_path.clone(),
    })
}
