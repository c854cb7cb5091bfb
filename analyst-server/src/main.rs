//! Analyst server - HTTP front end for the chart analysis loop.

mod routes;
mod state;

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use analyst::io::config::{DEFAULT_CONFIG_FILE, load_config};
use anyhow::Context;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "analyst-server")]
#[command(about = "HTTP API that turns a CSV upload and a chart request into reviewed charts")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Analyst config file (defaults apply when it does not exist)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Root directory for run-scoped chart directories (defaults to the configured charts_dir)
    #[arg(long)]
    charts_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("analyst_server=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    let charts_dir = args
        .charts_dir
        .unwrap_or_else(|| config.charts_dir.clone());
    fs::create_dir_all(&charts_dir)
        .with_context(|| format!("create {}", charts_dir.display()))?;
    let charts_dir = charts_dir
        .canonicalize()
        .with_context(|| format!("resolve {}", charts_dir.display()))?;
    info!(charts_dir = %charts_dir.display(), "starting analyst-server");

    let state = AppState::new(config, charts_dir);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::api_router().layer(cors).with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
