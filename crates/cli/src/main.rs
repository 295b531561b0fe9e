mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use onegate_gateway::{ConnectionRegistry, EventHandler, GatewayServer, LoggingHandler};

#[derive(Parser)]
#[command(name = "onegate", about = "onegate: OneBot v11 reverse WebSocket gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory to load `onegate.{toml,yaml,yml,json}` from.
    #[arg(long, global = true, env = "ONEGATE_CONFIG_DIR")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured service until Ctrl-C.
    Gateway,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Parse a CQ-code string and print its segments as JSON.
    Cq { text: String },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn run_gateway() -> anyhow::Result<()> {
    let config = onegate_config::discover_and_load()?;
    config.validate()?;

    let registry = Arc::new(ConnectionRegistry::new());
    let handler: Arc<dyn EventHandler> = Arc::new(LoggingHandler);
    let mut servers: Vec<GatewayServer> = Vec::with_capacity(config.services.len());
    for service in config.services {
        let server = GatewayServer::new(service, Arc::clone(&registry), Arc::clone(&handler));
        if let Err(e) = server.start().await {
            for started in &servers {
                started.stop().await;
            }
            return Err(e);
        }
        servers.push(server);
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for server in &servers {
        server.stop().await;
    }
    if !registry.is_empty() {
        warn!(remaining = registry.len(), "connections left after shutdown");
    }
    Ok(())
}

fn print_cq(text: &str) -> anyhow::Result<()> {
    let message = onegate_message::cq::parse(text);
    println!(
        "{}",
        serde_json::to_string_pretty(&onegate_message::to_value(&message))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config {
        onegate_config::set_config_dir(dir.clone());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "onegate starting");

    match cli.command {
        Commands::Gateway => run_gateway().await,
        Commands::Config { action } => config_commands::handle_config(action),
        Commands::Cq { text } => print_cq(&text),
    }
}
