// projeto: lstmpetr4
// file: src/main.rs
// Treinamento do modelo LSTM de previsão do fechamento do próximo dia

use chrono::{NaiveDate, Utc};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Instant;

use lstmpetr4::config::{Config, Environment};
use lstmpetr4::neural::pipeline::FitScope;
use lstmpetr4::neural::trainer::run_training;
use lstmpetr4::neural::TrainingError;

#[derive(Parser, Debug)]
#[command(
    name = "lstm-train",
    version,
    about = "Treina o modelo LSTM de previsão do fechamento do próximo dia",
    long_about = "Baixa o histórico de fechamentos, normaliza, gera janelas deslizantes, treina uma LSTM de duas camadas e salva modelo e normalizador."
)]
struct Cli {
    /// Arquivo de configuração TOML (padrão: config.toml, se existir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ticker do ativo (ex: PETR4.SA)
    #[arg(long)]
    ticker: Option<String>,

    /// Data inicial do histórico (AAAA-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Data final do histórico, exclusiva (padrão: hoje)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Tamanho da janela de entrada
    #[arg(long, help = "Número de dias históricos para predição")]
    window: Option<usize>,

    /// Fração das amostras reservada para teste
    #[arg(long)]
    test_ratio: Option<f64>,

    /// Número de épocas de treinamento
    #[arg(long)]
    epochs: Option<usize>,

    /// Tamanho do lote para treinamento
    #[arg(long)]
    batch_size: Option<usize>,

    /// Semente aleatória (usada apenas em dev)
    #[arg(long)]
    seed: Option<u64>,

    /// Ambiente de execução
    #[arg(long, value_enum)]
    env: Option<Environment>,

    /// Preços usados para ajustar o normalizador
    #[arg(long, value_enum)]
    fit_scope: Option<FitScope>,

    /// Fonte de dados: yahoo ou csv:<caminho>
    #[arg(long)]
    provider: Option<String>,

    /// Diretório dos artefatos (modelo e normalizador)
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Modo verboso de logging
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(ticker) = &self.ticker {
            config.data.ticker = ticker.clone();
        }
        if let Some(start) = self.start_date {
            config.data.start_date = start;
        }
        if let Some(end) = self.end_date {
            config.data.end_date = Some(end);
        }
        if let Some(window) = self.window {
            config.data.window = window;
        }
        if let Some(ratio) = self.test_ratio {
            config.data.test_ratio = ratio;
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        if let Some(env) = self.env {
            config.training.environment = env;
        }
        if let Some(scope) = self.fit_scope {
            config.data.fit_scope = scope;
        }
        if let Some(provider) = &self.provider {
            config.data.provider = provider.clone();
        }
        if let Some(dir) = &self.models_dir {
            config.paths.models_dir = dir.clone();
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    info!("🚀 Pipeline de treinamento iniciado");
    info!("🕐 Iniciado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_process_env()?;
    cli.apply(&mut config);
    config.validate()?;
    config.print_summary();

    match config.effective_seed() {
        Some(seed) => info!("🎲 Ambiente DEV: semente fixa {}", seed),
        None => warn!("🎲 Ambiente PRD: pesos e dropout não são reprodutíveis"),
    }

    let provider = config.provider()?;
    let job = config.training_job(Utc::now().date_naive());

    match run_training(&job, provider.as_ref()) {
        Ok(report) => {
            info!("✅ Treinamento concluído em {:.2}s", start_time.elapsed().as_secs_f64());
            info!("📊 {} preços | {} treino | {} teste",
                  report.series_len, report.train_samples, report.test_samples);
            info!("🎯 MAE no teste: R$ {:.4} | RMSE: R$ {:.4}",
                  report.test_metrics.mae, report.test_metrics.rmse);
            info!("💾 Modelo salvo em {}", report.model_path.display());
            Ok(())
        }
        Err(e @ (TrainingError::DataUnavailable(_) | TrainingError::Provider(_))) => {
            error!("❌ Treinamento não pôde começar: falha ao obter dados: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("❌ Erro durante treinamento: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}
