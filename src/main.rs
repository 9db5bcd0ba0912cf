//! pactproxy CLI

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use pactproxy::config::Config;
use pactproxy::proxy::ProxyController;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        eprintln!("pactproxy v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: pactproxy <config.toml>");
        eprintln!();
        eprintln!("Log level is read from RUST_LOG (default: info).");
        process::exit(1);
    }

    if let Err(e) = run(PathBuf::from(&args[1])).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_file(&path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    let controller = ProxyController::builder(config)
        .build()
        .context("Failed to initialize proxy")?;

    let server = ProxyController::start(controller)
        .await
        .context("Failed to start proxy")?;

    server.run().await.context("Proxy stopped with an error")?;
    Ok(())
}
