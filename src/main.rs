use anyhow::Context;
use beverage_vision::config::{Args, Command, ModelArgs, ScanArgs, ServeArgs};
use beverage_vision::pipeline::model_provider::{ModelProvider, Pipeline, Recognizer};
use beverage_vision::scan::scan_paths;
use beverage_vision::service::display_names::DisplayNames;
use beverage_vision::service::routes::{AppState, cors_layer, router};
use clap::Parser;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn load_recognizer(models: &ModelArgs) -> anyhow::Result<Arc<dyn Recognizer>> {
    let provider = ModelProvider::from_paths(models.model_paths());
    let loaded = provider.acquire().context("failed to load models")?;
    Ok(Arc::new(Pipeline {
        models: loaded,
        config: models.pipeline_config(),
    }))
}

fn load_display_names(models: &ModelArgs) -> anyhow::Result<DisplayNames> {
    match &models.display_names {
        Some(path) => DisplayNames::from_file(path)
            .with_context(|| format!("failed to read display names from {}", path.display())),
        None => Ok(DisplayNames::default()),
    }
}

async fn serve(models: ModelArgs, args: ServeArgs) -> anyhow::Result<()> {
    let loader_args = models.clone();
    let recognizer = tokio::task::spawn_blocking(move || load_recognizer(&loader_args)).await??;
    let state = AppState {
        recognizer,
        display_names: Arc::new(load_display_names(&models)?),
    };
    let app = router(state)
        .layer(cors_layer(&args.cors_origins))
        .layer(TraceLayer::new_for_http());

    let address = args.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn scan(models: &ModelArgs, args: &ScanArgs) -> anyhow::Result<()> {
    let recognizer = load_recognizer(models)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let written = scan_paths(recognizer.as_ref(), &args.paths, args.nearest, &mut out)?;
    out.flush()?;
    info!(written, "scan finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Serve(serve_args) => serve(args.models, serve_args).await,
        Command::Scan(scan_args) => {
            tokio::task::spawn_blocking(move || scan(&args.models, &scan_args)).await?
        }
    }
}
