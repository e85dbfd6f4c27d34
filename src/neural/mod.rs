// projeto: lstmpetr4
// file: src/neural/mod.rs
// Module declarations for the forecasting pipeline

pub mod utils;      // Error handling, Adam optimizer and numeric helpers
pub mod data;       // Price series and market data providers
pub mod sequence;   // Sliding-window sample construction
pub mod scaler;     // Min-max scaling and its artifact
pub mod pipeline;   // Fetch, scale, sequence and split
pub mod model;      // Two-layer LSTM regressor with backpropagation through time
pub mod metrics;    // Epoch history and price-unit regression metrics
pub mod storage;    // JSON artifact persistence
pub mod trainer;    // Training loop and end-to-end training job
pub mod inference;  // Forecasting and serving-side artifact lifecycle

// Re-export commonly used items for convenience
pub use data::{CsvProvider, MarketDataProvider, PricePoint, PriceSeries, ProviderError, StaticProvider, YahooFinanceProvider};
pub use inference::{ArtifactState, Forecast, InferenceAdapter, InferenceError, ServingContext};
pub use model::{LstmModel, ModelBuilder, ModelConfig, SequenceModel};
pub use pipeline::{DataPipeline, DatasetSplit, FitScope, PipelineConfig};
pub use scaler::{MinMaxScaler, ScalerArtifact};
pub use sequence::{Sequence, SequenceBuilder};
pub use trainer::{run_training, Trainer, TrainingConfig, TrainingJob, TrainingReport};
pub use utils::TrainingError;
