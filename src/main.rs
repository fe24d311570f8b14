//! Mempool subscriber - main entry point
//!
//! Connects to the broker with the token from the environment, prints every
//! payload on the configured topic to stdout and exits cleanly on SIGINT or
//! SIGTERM. Diagnostics go to stderr.

use clap::{Parser, Subcommand};
use mempool_subscriber::config::SubscriberConfig;
use mempool_subscriber::error::sanitize_error_message;
use mempool_subscriber::observability::init_default_logging;
use mempool_subscriber::{
    spawn_signal_listener, ConnectionManager, Credential, LinePrinter, SubscriptionLoop,
};
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Subscribe to the mempool topic and print each message
#[derive(Parser)]
#[command(name = "mempool-subscriber")]
#[command(about = "Print every message published on a broker topic")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, overrides the config file
    #[arg(long, env = "BROKER_URL", value_name = "URL")]
    broker_url: Option<String>,

    /// Topic to subscribe to, overrides the config file
    #[arg(long, env = "SUBSCRIBE_TOPIC", value_name = "TOPIC")]
    topic: Option<String>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print messages until interrupted (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = [
    "mempool-subscriber.toml",
    "config/mempool-subscriber.toml",
];

#[tokio::main]
async fn main() {
    // Loaded before parsing so clap's env fallbacks see it. A missing .env is fine.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    init_default_logging(cli.verbose);

    if let Ok(path) = &dotenv {
        debug!("Loaded environment from {}", path.display());
    }

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", sanitize_error_message(&e.to_string()));
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_subscriber(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("{}", sanitize_error_message(&e.to_string()));
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(cli: &Cli) -> Result<SubscriberConfig, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            SubscriberConfig::load_from_file(path)?
        }
        None => match DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
        {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                SubscriberConfig::load_from_file(&path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                SubscriberConfig::default()
            }
        },
    };

    Ok(config.with_overrides(cli.broker_url.clone(), cli.topic.clone())?)
}

async fn run_subscriber(config: SubscriberConfig) -> Result<(), Box<dyn std::error::Error>> {
    let credential = Credential::from_env(&config.broker.token_env)?;

    info!(
        broker = %config.broker.url,
        topic = %config.subscription.topic,
        "Starting mempool subscriber v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cancel = CancellationToken::new();
    let signals = spawn_signal_listener(cancel.clone());

    let mut session = ConnectionManager::new(config.broker.clone())
        .connect(&credential)
        .await?;

    let mut subscription = SubscriptionLoop::with_capacity(config.subscription.inbound_capacity);
    let report = match subscription
        .subscribe(&mut session, &config.subscription.topic, LinePrinter::stdout())
        .await
    {
        Ok(()) => subscription.run(&mut session, cancel.clone()).await,
        Err(e) => Err(e),
    };

    // Stops the signal listener if the run ended on its own
    cancel.cancel();
    if let Err(e) = signals.await {
        warn!("Signal listener ended abnormally: {}", e);
    }

    if let Err(e) = session.close().await {
        warn!("Error while closing session: {}", e);
    }

    report?.into_result()?;
    Ok(())
}

fn handle_config_command(
    config: &SubscriberConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    match Credential::from_env(&config.broker.token_env) {
        Ok(_) => info!("Token variable {} is set", config.broker.token_env),
        Err(e) => warn!("{}", e),
    }

    info!("Configuration validation complete");
    Ok(())
}
