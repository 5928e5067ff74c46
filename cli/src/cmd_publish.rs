//! `alertrelay publish`: Census stream → EventFilter → durable queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use alertrelay_core::filter::EventFilter;
use alertrelay_queue::{PostgresQueue, QueuePublisher};
use alertrelay_stream::{CensusClient, CensusConfig, EventSource, SourceConfig};

use crate::QueueArgs;

#[derive(Args)]
pub struct PublishArgs {
    /// Census service id (without the `s:` prefix)
    #[arg(long, env = "SERVICEID", hide_env_values = true)]
    pub service_id: String,
    /// Census environment
    #[arg(long, env = "CENSUS_ENVIRONMENT", default_value = "ps2")]
    pub environment: String,
    /// Worlds to subscribe to upstream
    #[arg(long, env = "RELAY_WORLDS", value_delimiter = ',', default_value = "1,10,13,17,40")]
    pub worlds: Vec<String>,
    /// Zones whose alert starts are relayed
    #[arg(long, env = "RELAY_ZONES", value_delimiter = ',', default_value = "2,4,6,8")]
    pub zones: Vec<String>,
    /// Re-run the upstream subscription this often
    #[arg(long, env = "RESUBSCRIBE_INTERVAL_SECS", default_value_t = 120)]
    pub resubscribe_interval_secs: u64,

    #[command(flatten)]
    pub queue: QueueArgs,
}

pub async fn run(args: PublishArgs) -> Result<()> {
    let census = CensusConfig {
        environment: args.environment.clone(),
        worlds: args.worlds.iter().map(|w| w.trim().into()).collect(),
        ..CensusConfig::for_service(args.service_id.clone())
    };
    let filter = EventFilter::new(args.zones.iter().map(|z| z.trim()));

    let queue = PostgresQueue::connect(&args.queue.uri, args.queue.options())
        .await
        .context("connecting to the durable queue")?;
    let publisher = Arc::new(QueuePublisher::new(Arc::new(queue)));
    publisher
        .ensure_declared()
        .await
        .with_context(|| format!("declaring queue '{}'", args.queue.name))?;

    let (client, signals) = CensusClient::connect(census)
        .await
        .context("connecting to the Census event stream")?;

    let source = EventSource::new(
        filter,
        publisher,
        SourceConfig {
            resubscribe_interval: Duration::from_secs(args.resubscribe_interval_secs),
        },
    );

    let result = source.run(signals, client.commands(), crate::shutdown_signal()).await;
    info!(metrics = ?source.metrics(), "publisher stopped");
    drop(client);

    result.context("Census event stream ended")
}
