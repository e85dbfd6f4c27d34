// projeto: lstmpetr4
// file: src/neural/inference.rs
// Next-day forecasts from a raw price window, and the serving-side artifact lifecycle

use chrono::{Duration, NaiveDate};
use log::{error, info, warn};
use ndarray::Array3;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::neural::data::{MarketDataProvider, ProviderError};
use crate::neural::model::{LstmModel, SequenceModel};
use crate::neural::scaler::ScalerArtifact;
use crate::neural::storage::load_model;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Expected exactly {expected} prices, got {actual}")]
    InputLength { expected: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model or scaler not loaded: {0}")]
    ServiceUnavailable(String),

    #[error("Market data retrieval failed: {0}")]
    Upstream(#[from] ProviderError),

    #[error("Only {actual} recent prices available, need {required}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Model produced a non-finite forecast")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forecast {
    /// Next-day close in price units.
    pub price: f64,
    pub last_price: f64,
    pub percent_change: f64,
}

pub struct InferenceAdapter;

impl InferenceAdapter {
    /// Scales the window with the training scaler, runs the model and maps
    /// the output back to price units. The window must hold exactly the
    /// model's window length of finite prices.
    pub fn predict<M: SequenceModel + ?Sized>(
        recent_window: &[f64],
        model: &M,
        scaler: &ScalerArtifact,
    ) -> Result<Forecast, InferenceError> {
        let expected = model.window();
        if recent_window.len() != expected {
            return Err(InferenceError::InputLength { expected, actual: recent_window.len() });
        }
        if let Some(pos) = recent_window.iter().position(|p| !p.is_finite() || *p <= 0.0) {
            return Err(InferenceError::InvalidInput(format!(
                "price at position {} must be a positive number, got {}", pos, recent_window[pos]
            )));
        }

        let scaled = scaler.transform(recent_window);
        let input = Array3::from_shape_vec((1, expected, 1), scaled)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        let output = model.predict(&input);
        let scaled_next = output.first().copied().ok_or(InferenceError::NonFinite)?;

        let price = scaler.inverse_transform_value(scaled_next);
        if !price.is_finite() {
            return Err(InferenceError::NonFinite);
        }

        let last_price = recent_window[expected - 1];
        let percent_change = (price - last_price) / last_price * 100.0;

        Ok(Forecast { price, last_price, percent_change })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactState {
    Unloaded,
    Loaded,
    Ready,
    Unavailable { reason: String },
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactState::Unloaded => write!(f, "unloaded"),
            ArtifactState::Loaded => write!(f, "loaded"),
            ArtifactState::Ready => write!(f, "ready"),
            ArtifactState::Unavailable { reason } => write!(f, "unavailable ({})", reason),
        }
    }
}

#[derive(Debug)]
struct ServingArtifacts {
    model: LstmModel,
    scaler: ScalerArtifact,
}

/// Model and scaler loaded once at startup and shared read-only by every
/// request. Never transitions out of `Ready` or `Unavailable`.
#[derive(Debug)]
pub struct ServingContext {
    ticker: String,
    window: usize,
    state: ArtifactState,
    artifacts: Option<ServingArtifacts>,
}

impl ServingContext {
    /// Unloaded -> Loaded -> Ready, or Unavailable on the first failure.
    pub fn load(model_path: &Path, scaler_path: &Path, ticker: &str, window: usize) -> Self {
        let mut context = ServingContext {
            ticker: ticker.to_string(),
            window,
            state: ArtifactState::Unloaded,
            artifacts: None,
        };

        let loaded = load_model(model_path).and_then(|artifact| {
            ScalerArtifact::load(scaler_path).map(|scaler| (artifact, scaler))
        });
        match loaded {
            Ok((artifact, scaler)) => {
                if artifact.asset != ticker {
                    warn!("⚠️ [Serving] Model was trained for {}, serving {}", artifact.asset, ticker);
                }
                context.state = ArtifactState::Loaded;
                if artifact.scaler != scaler {
                    let reason = format!(
                        "scaler at {} (min {}, max {}) is not the one the model was trained with (min {}, max {})",
                        scaler_path.display(), scaler.data_min, scaler.data_max,
                        artifact.scaler.data_min, artifact.scaler.data_max
                    );
                    error!("❌ [Serving] {}", reason);
                    context.state = ArtifactState::Unavailable { reason };
                    return context;
                }
                context.promote(artifact.model, scaler);
            }
            Err(e) => {
                error!("❌ [Serving] Could not load artifacts: {}", e);
                context.state = ArtifactState::Unavailable { reason: e.to_string() };
            }
        }
        context
    }

    /// Builds a context from artifacts already in memory.
    pub fn from_artifacts(model: LstmModel, scaler: ScalerArtifact, ticker: &str, window: usize) -> Self {
        let mut context = ServingContext {
            ticker: ticker.to_string(),
            window,
            state: ArtifactState::Loaded,
            artifacts: None,
        };
        context.promote(model, scaler);
        context
    }

    pub fn unavailable(reason: &str, ticker: &str, window: usize) -> Self {
        ServingContext {
            ticker: ticker.to_string(),
            window,
            state: ArtifactState::Unavailable { reason: reason.to_string() },
            artifacts: None,
        }
    }

    fn promote(&mut self, model: LstmModel, scaler: ScalerArtifact) {
        if model.window() != self.window {
            let reason = format!(
                "model window {} does not match configured window {}",
                model.window(), self.window
            );
            error!("❌ [Serving] {}", reason);
            self.state = ArtifactState::Unavailable { reason };
            return;
        }
        if let Err(e) = model.validate().and_then(|_| scaler.validate()) {
            error!("❌ [Serving] {}", e);
            self.state = ArtifactState::Unavailable { reason: e.to_string() };
            return;
        }

        self.artifacts = Some(ServingArtifacts { model, scaler });
        self.state = ArtifactState::Ready;
        info!("✅ [Serving] Model and scaler ready for {} (window {})", self.ticker, self.window);
    }

    pub fn state(&self) -> &ArtifactState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ArtifactState::Ready
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn ready_artifacts(&self) -> Result<&ServingArtifacts, InferenceError> {
        match (&self.state, &self.artifacts) {
            (ArtifactState::Ready, Some(artifacts)) => Ok(artifacts),
            (state, _) => Err(InferenceError::ServiceUnavailable(state.to_string())),
        }
    }

    pub fn predict(&self, prices: &[f64]) -> Result<Forecast, InferenceError> {
        let artifacts = self.ready_artifacts()?;
        InferenceAdapter::predict(prices, &artifacts.model, &artifacts.scaler)
    }

    /// Fetches the most recent window of closes ending before `today` and forecasts from it.
    pub fn predict_latest(&self, provider: &dyn MarketDataProvider, today: NaiveDate) -> Result<Forecast, InferenceError> {
        let artifacts = self.ready_artifacts()?;
        let prices = recent_window(provider, &self.ticker, self.window, today)?;
        InferenceAdapter::predict(&prices, &artifacts.model, &artifacts.scaler)
    }
}

/// The last `window` valid closes strictly before `today`. Looks back far
/// enough to cover weekends and holidays.
pub fn recent_window(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    window: usize,
    today: NaiveDate,
) -> Result<Vec<f64>, InferenceError> {
    let lookback = Duration::days(window as i64 * 2 + 30);
    let series = provider
        .fetch_closes(ticker, today - lookback, today)?
        .cleaned()
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let closes = series.closes();
    if closes.len() < window {
        return Err(InferenceError::InsufficientData { required: window, actual: closes.len() });
    }
    Ok(closes[closes.len() - window..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::{PricePoint, PriceSeries, StaticProvider};
    use crate::neural::model::ModelBuilder;
    use crate::neural::scaler::MinMaxScaler;
    use crate::neural::storage::{save_model, ModelArtifact};
    use crate::neural::utils::make_rng;
    use ndarray::Array1;
    use std::cell::Cell;
    use tempfile::tempdir;

    /// Returns the scaled last value and counts invocations.
    struct LastValue {
        window: usize,
        calls: Cell<usize>,
    }

    impl SequenceModel for LastValue {
        fn window(&self) -> usize {
            self.window
        }

        fn predict(&self, inputs: &Array3<f64>) -> Array1<f64> {
            self.calls.set(self.calls.get() + 1);
            Array1::from_elem(1, inputs[[0, self.window - 1, 0]])
        }
    }

    fn scaler() -> ScalerArtifact {
        MinMaxScaler::fit(&[20.0, 40.0]).unwrap()
    }

    #[test]
    fn test_adapter_round_trips_through_scaler() {
        let model = LastValue { window: 60, calls: Cell::new(0) };
        let prices: Vec<f64> = (0..60).map(|i| 25.0 + i as f64 * 0.1).collect();

        let forecast = InferenceAdapter::predict(&prices, &model, &scaler()).unwrap();

        assert!((forecast.price - 30.9).abs() < 1e-9);
        assert_eq!(forecast.last_price, prices[59]);
        assert!(forecast.percent_change.abs() < 1e-9);
        assert_eq!(model.calls.get(), 1);
    }

    #[test]
    fn test_wrong_length_never_invokes_model() {
        let model = LastValue { window: 60, calls: Cell::new(0) };
        let prices = vec![30.0; 59];

        let err = InferenceAdapter::predict(&prices, &model, &scaler()).unwrap_err();

        assert!(matches!(err, InferenceError::InputLength { expected: 60, actual: 59 }));
        assert_eq!(model.calls.get(), 0);
    }

    #[test]
    fn test_non_finite_or_non_positive_input_is_rejected() {
        let model = LastValue { window: 3, calls: Cell::new(0) };
        let err = InferenceAdapter::predict(&[30.0, f64::NAN, 31.0], &model, &scaler()).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidInput(_)));
        let err = InferenceAdapter::predict(&[30.0, 31.0, 0.0], &model, &scaler()).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidInput(_)));
        assert_eq!(model.calls.get(), 0);
    }

    #[test]
    fn test_missing_artifacts_make_context_unavailable() {
        let dir = tempdir().unwrap();
        let context = ServingContext::load(
            &dir.path().join("model.json"),
            &dir.path().join("scaler.json"),
            "PETR4.SA",
            60,
        );

        assert!(matches!(context.state(), ArtifactState::Unavailable { .. }));
        assert!(!context.is_ready());
        assert!(matches!(context.predict(&[30.0; 60]), Err(InferenceError::ServiceUnavailable(_))));
    }

    #[test]
    fn test_unavailable_context_does_not_touch_provider() {
        struct Panicking;
        impl MarketDataProvider for Panicking {
            fn fetch_closes(&self, _: &str, _: NaiveDate, _: NaiveDate) -> Result<PriceSeries, ProviderError> {
                panic!("provider must not be called");
            }
            fn name(&self) -> &str {
                "panicking"
            }
        }

        let context = ServingContext::unavailable("no model", "PETR4.SA", 60);
        let today = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert!(matches!(
            context.predict_latest(&Panicking, today),
            Err(InferenceError::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_load_persisted_artifacts_reaches_ready() {
        let dir = tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let scaler_path = dir.path().join("scaler.json");
        let model = ModelBuilder::new(5).hidden_size(4).build(&mut make_rng(Some(42))).unwrap();
        save_model(&model_path, &ModelArtifact::new("PETR4.SA", scaler(), 0, None, model.clone())).unwrap();
        scaler().persist(&scaler_path).unwrap();

        let context = ServingContext::load(&model_path, &scaler_path, "PETR4.SA", 5);
        assert_eq!(context.state(), &ArtifactState::Ready);

        let prices = [30.0, 30.5, 31.0, 30.8, 31.2];
        let forecast = context.predict(&prices).unwrap();
        let direct = InferenceAdapter::predict(&prices, &model, &scaler()).unwrap();
        assert_eq!(forecast, direct);
        assert!(forecast.price.is_finite());
    }

    #[test]
    fn test_window_mismatch_is_unavailable() {
        let model = ModelBuilder::new(5).hidden_size(4).build(&mut make_rng(Some(1))).unwrap();
        let context = ServingContext::from_artifacts(model, scaler(), "PETR4.SA", 60);
        assert!(matches!(context.state(), ArtifactState::Unavailable { reason } if reason.contains("window")));
    }

    #[test]
    fn test_recent_window_takes_latest_closes() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 30.0 + i as f64).collect();
        let provider = StaticProvider::new(PriceSeries::from_closes("PETR4.SA", start, &closes));
        let today = start + Duration::days(40);

        let window = recent_window(&provider, "PETR4.SA", 5, today).unwrap();
        assert_eq!(window, vec![65.0, 66.0, 67.0, 68.0, 69.0]);

        let err = recent_window(&provider, "PETR4.SA", 50, today).unwrap_err();
        assert!(matches!(err, InferenceError::InsufficientData { required: 50, actual: 40 }));
    }

    #[test]
    fn test_scaler_from_another_run_is_unavailable() {
        let dir = tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let scaler_path = dir.path().join("scaler.json");
        let model = ModelBuilder::new(5).hidden_size(4).build(&mut make_rng(Some(42))).unwrap();
        save_model(&model_path, &ModelArtifact::new("PETR4.SA", scaler(), 0, None, model)).unwrap();
        MinMaxScaler::fit(&[80.0, 95.0]).unwrap().persist(&scaler_path).unwrap();

        let context = ServingContext::load(&model_path, &scaler_path, "PETR4.SA", 5);
        assert!(matches!(context.state(), ArtifactState::Unavailable { reason } if reason.contains("trained with")));
        assert!(matches!(context.predict(&[30.0; 5]), Err(InferenceError::ServiceUnavailable(_))));
    }

    #[test]
    fn test_recent_window_rejects_repeated_dates() {
        let day = |d: u32| NaiveDate::from_ymd_opt(2025, 1, d).unwrap();
        let points = [(2, 30.0), (3, 31.0), (6, 32.0), (3, 29.0), (7, 33.0)]
            .iter()
            .map(|&(d, close)| PricePoint { date: day(d), close })
            .collect();
        let provider = StaticProvider::new(PriceSeries::new("PETR4.SA", points));

        let err = recent_window(&provider, "PETR4.SA", 5, day(8)).unwrap_err();
        assert!(matches!(err, InferenceError::Upstream(ProviderError::Malformed(_))));
    }
}
