mod catalog;
mod collaborators;
mod configuration;
mod conversations;
mod error;
mod logging;
mod routes;
mod state;
mod tools;
mod vendor;

use std::path::PathBuf;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Realtime voice and text session server")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = configuration::Settings::new(cli.config.as_deref())?;
    let _log_guard = logging::setup_logging(&settings.logging)?;

    let state = state::AppState::new(&settings).await?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
