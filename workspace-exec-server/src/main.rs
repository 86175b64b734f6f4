use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workspace_exec::ExecConfig;
use workspace_exec_server::{create_app, run_server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// TOML file with engine settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of concurrent runs
    #[arg(short, long)]
    max_concurrent: Option<usize>,

    /// Path to the dotnet host
    #[arg(long)]
    dotnet: Option<PathBuf>,

    /// Directory under which workspaces are created
    #[arg(long)]
    workspaces_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExecConfig::load(path)?,
        None => ExecConfig::default(),
    };
    if let Some(max_concurrent) = args.max_concurrent {
        config.max_concurrent_runs = max_concurrent;
    }
    if let Some(dotnet) = args.dotnet {
        config.dotnet_path = dotnet;
    }
    if let Some(root) = args.workspaces_root {
        config.workspaces_root = root;
    }

    let app = create_app(config)?;
    run_server(app, args.addr).await?;

    Ok(())
}
