use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use litterrobot::integrations::litterrobot::account_factory;
use litterrobot::integrations::litterrobot::ConfigFlow;
use litterrobot::integrations::litterrobot::FlowResult;
use litterrobot::Config;
use litterrobot::Engine;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Litter-Robot daemon
#[derive(Parser, Debug)]
#[command(name = "litterrobotd")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to the configuration file.
        #[arg(short, long, default_value = "litterrobotd.toml")]
        config: PathBuf,
    },
    /// Check the configuration and log in to every configured account.
    Validate {
        /// Path to the configuration file.
        #[arg(short, long, default_value = "litterrobotd.toml")]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("litterrobotd starting");
    tracing::info!("Default timezone: {}", config.location.timezone);

    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config);
    let engine = Arc::new(engine);

    let engine_task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let (api_shutdown_tx, api_shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = config.api.as_ref().map(|api| {
        let listen = api.listen.clone();
        let port = api.port;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = litterrobot::api::serve(listen, port, engine, api_shutdown_rx).await {
                tracing::error!("HTTP API server failed: {:#}", e);
            }
        })
    });

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    if let Some(api_task) = api_task {
        let _ = api_shutdown_tx.send(());
        if let Err(e) = api_task.await {
            tracing::warn!("HTTP API task ended abnormally: {}", e);
        }
    }

    tracing::info!("Unloading integrations...");
    engine.shutdown().await;
    engine_task.abort();

    tracing::info!("litterrobotd shutdown complete");
    Ok(())
}

async fn validate(config: Config) -> anyhow::Result<()> {
    let Some(litterrobot) = &config.integrations.litterrobot else {
        println!("No Litter-Robot accounts configured");
        return Ok(());
    };

    let factory = account_factory(&litterrobot.cloud)?;
    let mut ok = true;
    for account in &litterrobot.accounts {
        // Each account gets its own flow so every one of them is checked
        let mut flow = ConfigFlow::new(factory.clone());
        match flow.step_user(Some(account.clone())).await {
            FlowResult::CreateEntry(entry) => println!("{}: ok", entry.title),
            FlowResult::ShowForm { errors } => {
                ok = false;
                let reason = errors.get("base").map(String::as_str).unwrap_or("unknown");
                println!("{}: {}", account.username, reason);
            }
            FlowResult::Abort { reason } => {
                ok = false;
                println!("{}: {}", account.username, reason);
            }
        }
    }

    if litterrobot.accounts.len() > 1 {
        println!("Only the first account is used; the others are already_configured");
    }
    anyhow::ensure!(ok, "validation failed");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run { config } => run(load_config(&config)?).await,
        Command::Validate { config } => validate(load_config(&config)?).await,
    }
}
