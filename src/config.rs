// projeto: lstmpetr4
// file: src/config.rs
// Runtime configuration: defaults, optional config.toml, environment overrides

use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::neural::data::{CsvProvider, MarketDataProvider, ProviderError, YahooFinanceProvider};
use crate::neural::model::ModelConfig;
use crate::neural::pipeline::{FitScope, PipelineConfig};
use crate::neural::trainer::{TrainingConfig, TrainingJob};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),
}

/// `dev` fixes every random seed; `prd` draws from OS entropy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prd,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub training: TrainingSettings,
    pub paths: PathsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub ticker: String,
    pub start_date: NaiveDate,
    /// Exclusive; today when absent.
    pub end_date: Option<NaiveDate>,
    pub window: usize,
    pub test_ratio: f64,
    pub fit_scope: FitScope,
    /// `yahoo` or `csv:<path>`.
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
    pub model_file: String,
    pub scaler_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            ticker: "PETR4.SA".to_string(),
            start_date: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            end_date: None,
            window: 60,
            test_ratio: 0.20,
            fit_scope: FitScope::WholeSeries,
            provider: "yahoo".to_string(),
        }
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        TrainingSettings {
            epochs: 20,
            batch_size: 64,
            seed: 42,
            environment: Environment::Dev,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            models_dir: PathBuf::from("models"),
            model_file: "lstm_petr4.json".to_string(),
            scaler_file: "scaler_petr4.json".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { bind_addr: "0.0.0.0:8000".to_string() }
    }
}

impl Config {
    /// Reads `path` when given, else `config.toml` if present, else defaults.
    /// Missing keys fall back to their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path.is_some();
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

        if !explicit && !path.exists() {
            info!("📄 No {} found, using defaults", DEFAULT_CONFIG_FILE);
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = Config::from_toml_str(&content)?;
        info!("⚙️ Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `PIPELINE_ENV` (`dev`/`prd`, with `PIPELINE_AMBIENTE` as an
    /// alias) and `SEED` through `lookup`, normally `std::env::var`.
    /// `PIPELINE_ENV` wins when both are set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("PIPELINE_ENV").or_else(|| lookup("PIPELINE_AMBIENTE")) {
            self.training.environment = match env.trim().to_ascii_lowercase().as_str() {
                "dev" => Environment::Dev,
                "prd" => Environment::Prd,
                other => {
                    return Err(ConfigError::Invalid(format!("PIPELINE_ENV must be dev or prd, got {}", other)));
                }
            };
        }
        if let Some(seed) = lookup("SEED") {
            self.training.seed = seed
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SEED must be an unsigned integer, got {}", seed)))?;
        }
        Ok(())
    }

    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.ticker.trim().is_empty() {
            return Err(ConfigError::Invalid("ticker cannot be empty".to_string()));
        }
        if self.data.window == 0 {
            return Err(ConfigError::Invalid("window must be greater than zero".to_string()));
        }
        if !(self.data.test_ratio > 0.0 && self.data.test_ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "test_ratio must be in (0, 1), got {}", self.data.test_ratio
            )));
        }
        if let Some(end) = self.data.end_date {
            if end <= self.data.start_date {
                return Err(ConfigError::Invalid(format!(
                    "end_date {} must come after start_date {}", end, self.data.start_date
                )));
            }
        }
        if self.training.epochs == 0 {
            return Err(ConfigError::Invalid("epochs must be greater than zero".to_string()));
        }
        if self.training.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than zero".to_string()));
        }
        if self.data.provider != "yahoo" && !self.data.provider.starts_with("csv:") {
            return Err(ConfigError::Invalid(format!(
                "provider must be yahoo or csv:<path>, got {}", self.data.provider
            )));
        }
        Ok(())
    }

    /// Seed for the run: fixed in development, none in production.
    pub fn effective_seed(&self) -> Option<u64> {
        match self.training.environment {
            Environment::Dev => Some(self.training.seed),
            Environment::Prd => None,
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.paths.models_dir.join(&self.paths.model_file)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.paths.models_dir.join(&self.paths.scaler_file)
    }

    pub fn end_date(&self, today: NaiveDate) -> NaiveDate {
        self.data.end_date.unwrap_or(today)
    }

    /// Builds the configured market data provider. The Yahoo client must be
    /// created outside of an async runtime.
    pub fn provider(&self) -> Result<Box<dyn MarketDataProvider>, ConfigError> {
        match self.data.provider.strip_prefix("csv:") {
            Some(path) => Ok(Box::new(CsvProvider::new(path))),
            None if self.data.provider == "yahoo" => Ok(Box::new(YahooFinanceProvider::new()?)),
            None => Err(ConfigError::Invalid(format!("unknown provider {}", self.data.provider))),
        }
    }

    pub fn training_job(&self, today: NaiveDate) -> TrainingJob {
        TrainingJob {
            pipeline: PipelineConfig {
                ticker: self.data.ticker.clone(),
                start_date: self.data.start_date,
                end_date: self.end_date(today),
                window: self.data.window,
                test_ratio: self.data.test_ratio,
                fit_scope: self.data.fit_scope,
                scaler_path: self.scaler_path(),
            },
            model: ModelConfig::new(self.data.window),
            training: TrainingConfig {
                epochs: self.training.epochs,
                batch_size: self.training.batch_size,
            },
            model_path: self.model_path(),
            seed: self.effective_seed(),
        }
    }

    pub fn print_summary(&self) {
        info!("📋 Configuration:");
        info!("  📈 Ticker: {} from {} (window {}, test ratio {:.2})",
              self.data.ticker, self.data.start_date, self.data.window, self.data.test_ratio);
        info!("  🧠 Training: epochs={}, batch_size={}, env={:?}, seed={:?}",
              self.training.epochs, self.training.batch_size,
              self.training.environment, self.effective_seed());
        info!("  💾 Artifacts: {} | {}", self.model_path().display(), self.scaler_path().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_reference_settings() {
        let config = Config::default();
        assert_eq!(config.data.ticker, "PETR4.SA");
        assert_eq!(config.data.start_date, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());
        assert_eq!(config.data.window, 60);
        assert_eq!(config.data.test_ratio, 0.20);
        assert_eq!(config.training.epochs, 20);
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.effective_seed(), Some(42));
        assert_eq!(config.model_path(), PathBuf::from("models/lstm_petr4.json"));
        assert_eq!(config.scaler_path(), PathBuf::from("models/scaler_petr4.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [data]
            window = 30
            start_date = "2018-06-01"
            fit_scope = "train-only"

            [training]
            environment = "prd"
            "#,
        )
        .unwrap();

        assert_eq!(config.data.window, 30);
        assert_eq!(config.data.start_date, NaiveDate::from_ymd_opt(2018, 6, 1).unwrap());
        assert_eq!(config.data.fit_scope, FitScope::TrainOnly);
        assert_eq!(config.data.ticker, "PETR4.SA");
        assert_eq!(config.training.epochs, 20);
        assert_eq!(config.effective_seed(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[training]\nepochs = 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.training.epochs, 3);
        assert!(matches!(
            Config::load(Some(&dir.path().join("missing.toml"))),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("PIPELINE_ENV", "PRD"), ("SEED", "7")].into_iter().collect();
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.training.environment, Environment::Prd);
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.effective_seed(), None);

        let mut config = Config::default();
        assert!(config.apply_env(|k| (k == "SEED").then(|| "abc".to_string())).is_err());
        assert!(config.apply_env(|k| (k == "PIPELINE_ENV").then(|| "staging".to_string())).is_err());
    }

    #[test]
    fn test_pipeline_ambiente_alias() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "PIPELINE_AMBIENTE").then(|| "prd".to_string())).unwrap();
        assert_eq!(config.training.environment, Environment::Prd);

        let vars: HashMap<&str, &str> = [("PIPELINE_ENV", "dev"), ("PIPELINE_AMBIENTE", "prd")].into_iter().collect();
        let mut config = Config::default();
        config.training.environment = Environment::Prd;
        config.apply_env(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.training.environment, Environment::Dev);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.data.test_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.data.provider = "bloomberg".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.data.end_date = Some(NaiveDate::from_ymd_opt(2014, 1, 1).unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_training_job_uses_today_when_end_missing() {
        let config = Config::default();
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let job = config.training_job(today);

        assert_eq!(job.pipeline.end_date, today);
        assert_eq!(job.model.window, 60);
        assert_eq!(job.model.hidden_size, 50);
        assert_eq!(job.seed, Some(42));
    }

    #[test]
    fn test_csv_provider_from_config() {
        let mut config = Config::default();
        config.data.provider = "csv:data/petr4.csv".to_string();
        assert_eq!(config.provider().unwrap().name(), "csv");
    }
}
