use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use similarity_core::config::Settings;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use server::build_app;
use tokio::net::TcpListener;

#[derive(Parser)]
struct Args {
    /// Model directory path
    #[arg(long, default_value = "./model")]
    model: PathBuf,
    /// Settings file (defaults to ./similarity.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    let app: Router = build_app(&args.model, settings.search).with_context(|| format!("loading model from {}", args.model.display()))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
