//! AlertRelay CLI.
//!
//! # Commands
//! ```text
//! alertrelay publish   # Census stream → filter → durable queue
//! alertrelay consume   # durable queue → subscriptions → web push
//! alertrelay info      # print the effective relay configuration
//! ```
//!
//! Every flag falls back to an environment variable, so the two long-running
//! commands can be configured entirely from the environment.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use alertrelay_observability::{init_tracing, LogConfig};

mod cmd_consume;
mod cmd_info;
mod cmd_publish;

#[derive(Parser)]
#[command(
    name = "alertrelay",
    about = "Relay PlanetSide 2 alert starts to Web Push subscribers",
    long_about = "
AlertRelay listens to the Census event stream for MetagameEvents, queues the
alert starts on relayed continents, and pushes a notification to every browser
subscribed to the affected server.

Run `publish` once per deployment and one or more `consume` processes.
",
    version
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LogArgs {
    /// Log level or RUST_LOG-style directives
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
    /// Emit JSON log lines
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream MetagameEvents from Census and queue the relay-worthy ones
    Publish(cmd_publish::PublishArgs),
    /// Consume queued alerts and send push notifications
    Consume(cmd_consume::ConsumeArgs),
    /// Print worlds, zones, queue and VAPID settings
    Info(cmd_info::InfoArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(&LogConfig {
        level: cli.log.log_level.clone(),
        json: cli.log.log_json,
        ..LogConfig::default()
    });

    if let Err(e) = run(cli.command).await {
        tracing::error!(error = %format!("{e:#}"), "alertrelay exited with an error");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Publish(args) => cmd_publish::run(args).await,
        Commands::Consume(args) => cmd_consume::run(args).await,
        Commands::Info(args) => cmd_info::run(args),
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
}

/// Queue connection flags shared by `publish` and `consume`.
#[derive(Args, Clone)]
pub(crate) struct QueueArgs {
    /// Postgres URI of the durable queue
    #[arg(long = "queue-uri", env = "QUEUE_CONNECTION_URI", hide_env_values = true)]
    pub uri: String,
    /// Queue name
    #[arg(long = "queue-name", env = "QUEUE_NAME", default_value = "MetagameEvent")]
    pub name: String,
    /// Seconds a received message stays invisible before redelivery
    #[arg(long, env = "QUEUE_VISIBILITY_TIMEOUT_SECS", default_value_t = 60)]
    pub visibility_timeout_secs: u64,
}

impl QueueArgs {
    pub fn options(&self) -> alertrelay_queue::PostgresQueueOptions {
        alertrelay_queue::PostgresQueueOptions {
            queue_name: self.name.clone(),
            visibility_timeout: std::time::Duration::from_secs(self.visibility_timeout_secs),
            ..Default::default()
        }
    }
}
