// projeto: lstmpetr4
// file: src/neural/pipeline.rs
// Fetch -> clean -> scale -> sequence -> chronological split, persisting the scaler on the way

use chrono::NaiveDate;
use log::{info, warn};
use ndarray::{s, Array1, Array3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::neural::data::MarketDataProvider;
use crate::neural::scaler::{MinMaxScaler, ScalerArtifact};
use crate::neural::sequence::SequenceBuilder;
use crate::neural::utils::{validate_targets, TrainingError};

/// Which prices the scaler sees when it is fitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FitScope {
    /// Every fetched price, test period included.
    #[default]
    WholeSeries,
    /// Only prices reachable from the training samples.
    TrainOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub ticker: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub window: usize,
    pub test_ratio: f64,
    pub fit_scope: FitScope,
    pub scaler_path: PathBuf,
}

/// Chronological train/test partition. Dates are the target dates of each sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit {
    pub x_train: Array3<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array3<f64>,
    pub y_test: Array1<f64>,
    pub train_dates: Vec<NaiveDate>,
    pub test_dates: Vec<NaiveDate>,
}

impl DatasetSplit {
    pub fn train_len(&self) -> usize {
        self.y_train.len()
    }

    pub fn test_len(&self) -> usize {
        self.y_test.len()
    }
}

#[derive(Debug, Clone)]
pub struct PreparedData {
    pub split: DatasetSplit,
    pub scaler: ScalerArtifact,
    pub series_len: usize,
}

/// Index of the first test sample, `floor(n * (1 - ratio))`.
pub fn split_index(n_sequences: usize, test_ratio: f64) -> usize {
    (n_sequences as f64 * (1.0 - test_ratio)).floor() as usize
}

pub struct DataPipeline<'a> {
    provider: &'a dyn MarketDataProvider,
}

impl<'a> DataPipeline<'a> {
    pub fn new(provider: &'a dyn MarketDataProvider) -> Self {
        DataPipeline { provider }
    }

    pub fn run(&self, config: &PipelineConfig) -> Result<PreparedData, TrainingError> {
        let window = config.window;
        if window == 0 {
            return Err(TrainingError::ModelConfiguration("window must be positive".to_string()));
        }
        if !(config.test_ratio > 0.0 && config.test_ratio < 1.0) {
            return Err(TrainingError::ModelConfiguration(
                format!("test ratio must be in (0, 1), got {}", config.test_ratio)
            ));
        }

        info!("📥 [Pipeline] Fetching {} via {} ({} to {})",
              config.ticker, self.provider.name(), config.start_date, config.end_date);
        let series = self.provider.fetch_closes(&config.ticker, config.start_date, config.end_date)?;
        if series.is_empty() {
            return Err(TrainingError::DataUnavailable(
                format!("no prices returned for {}", config.ticker)
            ));
        }

        let series = series.cleaned()?;
        let n = series.len();
        if n < window + 2 {
            return Err(TrainingError::DataUnavailable(format!(
                "{} prices for {}, need at least {} for window {}",
                n, config.ticker, window + 2, window
            )));
        }

        let prices = series.closes();
        let dates = series.dates();
        let n_sequences = n - window;
        let split_at = split_index(n_sequences, config.test_ratio);
        if split_at == 0 || split_at == n_sequences {
            return Err(TrainingError::DataUnavailable(format!(
                "{} samples cannot be split with test ratio {}",
                n_sequences, config.test_ratio
            )));
        }

        let fitted = match config.fit_scope {
            FitScope::WholeSeries => &prices[..],
            FitScope::TrainOnly => &prices[..split_at + window],
        };
        let scaler = MinMaxScaler::fit(fitted)?;
        if config.fit_scope == FitScope::WholeSeries {
            warn!("⚠️ [Pipeline] Scaler fitted on the whole series, test prices included");
        }
        info!("🔧 [Pipeline] Scaler range: R$ {:.4} .. R$ {:.4}", scaler.data_min, scaler.data_max);

        let scaled = scaler.transform(&prices);
        let builder = SequenceBuilder::new(window);
        let sequences = builder.build(&scaled);
        let (x, y) = builder.to_tensors(&sequences)?;
        validate_targets(y.as_slice().unwrap_or(&[]), "targets")?;

        let target_dates = dates[window..].to_vec();
        let split = DatasetSplit {
            x_train: x.slice(s![..split_at, .., ..]).to_owned(),
            y_train: y.slice(s![..split_at]).to_owned(),
            x_test: x.slice(s![split_at.., .., ..]).to_owned(),
            y_test: y.slice(s![split_at..]).to_owned(),
            train_dates: target_dates[..split_at].to_vec(),
            test_dates: target_dates[split_at..].to_vec(),
        };

        scaler.persist(&config.scaler_path)?;

        info!("✅ [Pipeline] {} prices -> {} train / {} test samples (window {})",
              n, split.train_len(), split.test_len(), window);

        Ok(PreparedData { split, scaler, series_len: n })
    }
}
