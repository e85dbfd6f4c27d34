// projeto: lstmpetr4
// file: src/api.rs
// HTTP surface: health message, prediction from a posted window, prediction from live data

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::neural::data::MarketDataProvider;
use crate::neural::inference::{Forecast, InferenceError, ServingContext};

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ServingContext>,
    pub provider: Arc<dyn MarketDataProvider>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Malformed request body: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Inference(InferenceError::InputLength { .. })
            | ApiError::Inference(InferenceError::InvalidInput(_))
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference(InferenceError::ServiceUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Inference(InferenceError::Upstream(_))
            | ApiError::Inference(InferenceError::InsufficientData { .. })
            | ApiError::Inference(InferenceError::NonFinite)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("❌ [API] {}", self);
        } else {
            warn!("⚠️ [API] {}", self);
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoricalPrices {
    pub prices: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionResponse {
    pub ticker: String,
    pub next_day_close: f64,
    pub last_close: f64,
    pub percent_change: f64,
    pub unit: String,
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

impl PredictionResponse {
    fn new(ticker: &str, forecast: Forecast) -> Self {
        PredictionResponse {
            ticker: ticker.to_string(),
            next_day_close: round4(forecast.price),
            last_close: forecast.last_price,
            percent_change: round4(forecast.percent_change),
            unit: "R$".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HomeResponse {
    message: String,
    status: String,
}

async fn home(State(state): State<AppState>) -> Json<HomeResponse> {
    Json(HomeResponse {
        message: format!("LSTM next-day close forecaster for {}", state.context.ticker()),
        status: state.context.state().to_string(),
    })
}

async fn predict_price(
    State(state): State<AppState>,
    body: Result<Json<HistoricalPrices>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(body) = body?;
    let forecast = state.context.predict(&body.prices)?;
    info!("🔮 [API] Forecast from posted window: R$ {:.4}", forecast.price);
    Ok(Json(PredictionResponse::new(state.context.ticker(), forecast)))
}

async fn predict_latest(State(state): State<AppState>) -> Result<Json<PredictionResponse>, ApiError> {
    // fail fast without touching the provider
    if !state.context.is_ready() {
        return Err(InferenceError::ServiceUnavailable(state.context.state().to_string()).into());
    }

    let context = state.context.clone();
    let provider = state.provider.clone();
    let today = Utc::now().date_naive();
    let forecast = tokio::task::spawn_blocking(move || context.predict_latest(provider.as_ref(), today))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!("🔮 [API] Forecast from latest market data: R$ {:.4}", forecast.price);
    Ok(Json(PredictionResponse::new(state.context.ticker(), forecast)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/predict/", post(predict_price))
        .route("/predict/latest", get(predict_latest))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::{PriceSeries, StaticProvider};
    use crate::neural::model::ModelBuilder;
    use crate::neural::scaler::MinMaxScaler;
    use crate::neural::utils::make_rng;

    fn empty_provider() -> Arc<dyn MarketDataProvider> {
        Arc::new(StaticProvider::new(PriceSeries::new("PETR4.SA", Vec::new())))
    }

    fn ready_state(window: usize) -> AppState {
        let model = ModelBuilder::new(window).hidden_size(4).build(&mut make_rng(Some(42))).unwrap();
        let scaler = MinMaxScaler::fit(&[20.0, 45.0]).unwrap();
        AppState {
            context: Arc::new(ServingContext::from_artifacts(model, scaler, "PETR4.SA", window)),
            provider: empty_provider(),
        }
    }

    fn unavailable_state() -> AppState {
        AppState {
            context: Arc::new(ServingContext::unavailable("model file missing", "PETR4.SA", 60)),
            provider: empty_provider(),
        }
    }

    #[test]
    fn test_error_status_mapping() {
        let bad = ApiError::from(InferenceError::InputLength { expected: 60, actual: 59 });
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let down = ApiError::from(InferenceError::ServiceUnavailable("unloaded".to_string()));
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        let upstream = ApiError::from(InferenceError::Upstream(
            crate::neural::data::ProviderError::TickerNotFound("PETR4.SA".to_string()),
        ));
        assert_eq!(upstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::Internal("join".to_string()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::BadRequest("prices".to_string()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_response_rounds_to_four_decimals() {
        let forecast = Forecast { price: 37.123456, last_price: 37.0, percent_change: 0.333689 };
        let response = PredictionResponse::new("PETR4.SA", forecast);
        assert_eq!(response.next_day_close, 37.1235);
        assert_eq!(response.percent_change, 0.3337);
        assert_eq!(response.unit, "R$");
    }

    #[tokio::test]
    async fn test_predict_handler_ready() {
        let state = ready_state(5);
        let body = HistoricalPrices { prices: vec![30.0, 30.4, 31.1, 30.9, 31.5] };

        let Json(response) = predict_price(State(state), Ok(Json(body))).await.unwrap();
        assert_eq!(response.ticker, "PETR4.SA");
        assert!(response.next_day_close.is_finite());
        assert_eq!(response.last_close, 31.5);
    }

    #[tokio::test]
    async fn test_predict_handler_wrong_length() {
        let body = HistoricalPrices { prices: vec![30.0; 4] };
        let err = predict_price(State(ready_state(5)), Ok(Json(body))).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_handler_unavailable() {
        let body = HistoricalPrices { prices: vec![30.0; 60] };
        let err = predict_price(State(unavailable_state()), Ok(Json(body))).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_latest_handler_with_too_little_data() {
        let err = predict_latest(State(ready_state(5))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_latest_handler_uses_recent_closes() {
        let mut state = ready_state(5);
        let today = Utc::now().date_naive();
        let start = today - chrono::Duration::days(10);
        let closes: Vec<f64> = (0..10).map(|i| 30.0 + i as f64 * 0.2).collect();
        state.provider = Arc::new(StaticProvider::new(PriceSeries::from_closes("PETR4.SA", start, &closes)));

        let Json(response) = predict_latest(State(state)).await.unwrap();
        assert!((response.last_close - closes[9]).abs() < 1e-12);
        assert!(response.next_day_close.is_finite());
    }

    #[tokio::test]
    async fn test_home_reports_state() {
        let Json(response) = home(State(unavailable_state())).await;
        assert!(response.message.contains("PETR4.SA"));
        assert!(response.status.starts_with("unavailable"));
    }
}
