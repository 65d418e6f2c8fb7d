use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ktimer_cli::{logging, serve, spawn_notifier};
use ktimer_core::{Registry, RegistryConfig, RegistryConfigExt};
use tokio::io::BufReader;
use tokio::sync::Mutex;

/// Host a timer registry and serve its line protocol on stdin/stdout.
#[derive(Parser)]
#[command(name = "ktimerd", version, about)]
struct Args {
    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial capacity limit (overrides the config file)
    #[arg(short = 'm', long)]
    capacity: Option<usize>,

    /// Module name reported by STATUS
    #[arg(long)]
    module_name: Option<String>,

    /// Print `EXPIRED <key>` on stdout when a timer fires
    #[arg(short, long)]
    notify: bool,
}

fn load_config(args: &Args) -> Result<RegistryConfig, String> {
    let mut config = match &args.config {
        Some(path) => RegistryConfig::load_from(path).map_err(|e| e.to_string())?,
        None => RegistryConfig::load(),
    };
    if let Some(capacity) = args.capacity {
        config.initial_capacity = capacity;
    }
    if let Some(name) = &args.module_name {
        config.module_name = name.clone();
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    logging::init();

    let config = load_config(&args)?;
    let (registry, actor) = Registry::spawn(config).map_err(|e| e.to_string())?;

    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let notifier = if args.notify {
        let subscription = registry.subscribe().await.map_err(|e| e.to_string())?;
        Some(spawn_notifier(subscription, Arc::clone(&stdout)))
    } else {
        None
    };

    let stdin = BufReader::new(tokio::io::stdin());
    match serve(&registry, stdin, stdout).await {
        Ok(served) => tracing::info!(served, "input closed"),
        Err(e) => tracing::error!(error = %e, "request loop failed"),
    }

    let cancelled = registry.shutdown().await.map_err(|e| e.to_string())?;
    tracing::info!(cancelled, "shutting down");
    if let Some(notifier) = notifier {
        notifier.await.map_err(|e| e.to_string())?;
    }
    actor.await.map_err(|e| e.to_string())?;

    Ok(())
}
