use clap::Parser;
use oidc_webapp::{config::Settings, start_server_with_config};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "oidc-webapp")]
#[command(about = "Web app with OpenID Connect login")]
#[command(version)]
struct Cli {
    /// TOML file with settings; environment variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overrides PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "oidc_webapp=info,tower_http=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(cli.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.json_logs).then(|| tracing_subscriber::fmt::layer().compact()))
        .init();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.port = port;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    start_server_with_config(settings, shutdown_rx).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, stopping server...");

    let _ = shutdown_tx.send(());
    // Short grace period for in-flight requests
    tokio::time::sleep(Duration::from_millis(200)).await;

    tracing::info!("server stopped");
    Ok(())
}
