use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reelpick::api::{create_router, AppState};
use reelpick::cli::{self, Cli, Commands};
use reelpick::config::{validate_api_key, Config};
use reelpick::services::RecommendationService;

async fn serve(config: Config, service: RecommendationService) -> Result<()> {
    let app = create_router(AppState::new(service));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "Server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set
    let default_filter = if cli.verbose {
        "reelpick=debug,tower_http=debug"
    } else {
        "reelpick=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env()?;
    if !validate_api_key(&config.tmdb_api_key) {
        tracing::warn!("TMDB_API_KEY is missing or too short, only cached movies will be available");
    }

    let command = cli.command.unwrap_or(Commands::Shell);
    if let Commands::Serve { host, port } = &command {
        if let Some(host) = host {
            config.host = host.clone();
        }
        if let Some(port) = port {
            config.port = *port;
        }
    }

    let service = RecommendationService::from_config(&config)?;

    match command {
        Commands::Serve { .. } => serve(config, service).await,
        Commands::Pick { genre_id, seed } => cli::run_pick(&service, genre_id, seed).await,
        Commands::Batch {
            count,
            genre_id,
            seed,
        } => cli::run_batch(&service, count, genre_id, seed).await,
        Commands::Refresh => cli::run_refresh(&service).await,
        Commands::Shell => cli::run_shell(&service).await,
    }
}
