// projeto: lstmpetr4
// file: src/bin/server.rs
// Servidor HTTP de previsão: carrega modelo e normalizador uma vez e atende requisições

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use lstmpetr4::api::{router, AppState};
use lstmpetr4::config::Config;
use lstmpetr4::neural::data::MarketDataProvider;
use lstmpetr4::neural::inference::ServingContext;

#[derive(Parser, Debug)]
#[command(name = "lstm-server", version, about = "API de previsão do fechamento do próximo dia")]
struct Cli {
    /// Arquivo de configuração TOML (padrão: config.toml, se existir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Endereço de escuta (ex: 0.0.0.0:8000)
    #[arg(long)]
    bind: Option<String>,

    /// Diretório dos artefatos (modelo e normalizador)
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Modo verboso de logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_process_env()?;
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    if let Some(dir) = cli.models_dir {
        config.paths.models_dir = dir;
    }
    config.validate()?;

    // artifacts are loaded exactly once; a failure leaves the service up but unavailable
    let context = ServingContext::load(
        &config.model_path(),
        &config.scaler_path(),
        &config.data.ticker,
        config.data.window,
    );
    if !context.is_ready() {
        warn!("⚠️ Serviço iniciado sem modelo: {}", context.state());
    }

    // the blocking HTTP client must be built outside the runtime
    let provider: Arc<dyn MarketDataProvider> = Arc::from(config.provider()?);
    let state = AppState { context: Arc::new(context), provider };

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(serve(state.clone(), config.server.bind_addr.clone()));
    drop(runtime);
    drop(state);

    if let Err(e) = &result {
        error!("❌ Servidor encerrado com erro: {}", e);
    }
    result
}

async fn serve(state: AppState, bind_addr: String) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("🌐 Servidor escutando em http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🏁 Servidor finalizado");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Falha ao aguardar sinal de encerramento: {}", e);
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
