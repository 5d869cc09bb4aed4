mod commands;
mod render;

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tracing::debug;

use lovisec_client::{Config, RestBackend};
use lovisec_store::LocalStore;

use commands::Command;

#[derive(Parser)]
#[command(name = "lovisec", version, about = "Anonymous secrets feed client")]
struct Cli {
    /// Keep local state (reactions, session, theme) in memory for this run only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so command output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lovisec=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = if cli.ephemeral {
        debug!("Using in-memory local state");
        LocalStore::open_in_memory()?
    } else {
        LocalStore::open(&config.state_path)?
    };
    let store = Arc::new(store);

    if !cli.command.needs_backend() {
        return commands::run_local(cli.command, &store).await;
    }

    let Some(backend_url) = config.backend_url.as_deref() else {
        bail!("LOVISEC_BACKEND_URL is not set; only `avatar` and `theme` work without a backend");
    };
    let backend = Arc::new(RestBackend::new(backend_url, &config.anon_key));

    commands::run(cli.command, backend, store, config.page_size).await
}
