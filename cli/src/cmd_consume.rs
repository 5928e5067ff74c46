//! `alertrelay consume`: durable queue → subscriptions → web push.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use alertrelay_dispatch::{
    AckMode, ConsumerConfig, DispatcherConfig, NotificationDispatcher, PostgresSubscriptionStore,
    QueueConsumer, SubscriptionMatcher, VapidConfig, WebPushService,
};
use alertrelay_queue::PostgresQueue;

use crate::QueueArgs;

#[derive(Args)]
pub struct ConsumeArgs {
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Postgres URI of the subscription store
    #[arg(long, env = "SUBSCRIPTION_STORE_URI", hide_env_values = true)]
    pub subscription_store_uri: String,
    /// Table holding subscription records
    #[arg(long, env = "SUBSCRIPTION_TABLE", default_value = "notify_subscriptions")]
    pub subscription_table: String,

    /// VAPID contact address
    #[arg(long, env = "CONTACTEMAIL")]
    pub contact: String,
    /// VAPID public key (URL-safe base64)
    #[arg(long, env = "PUBLICVAPIDKEY")]
    pub public_key: String,
    /// VAPID private key (URL-safe base64)
    #[arg(long, env = "PRIVATEVAPIDKEY", hide_env_values = true)]
    pub private_key: String,

    /// Push message time-to-live in seconds
    #[arg(long, env = "NOTIFICATION_TTL_SECS", default_value_t = 300)]
    pub ttl_secs: u64,
    /// Deliveries in flight per batch
    #[arg(long, env = "DISPATCH_CONCURRENCY", default_value_t = 16)]
    pub concurrency: usize,
    /// When to acknowledge a message: on-receipt or after-dispatch
    #[arg(long, env = "ACK_MODE", default_value = "after-dispatch")]
    pub ack_mode: AckMode,
    /// Give up on a message after this many deliveries (after-dispatch only)
    #[arg(long, env = "MAX_DELIVERIES", default_value_t = 5)]
    pub max_deliveries: u32,
    /// Competing consumer loops in this process
    #[arg(long, env = "CONSUMER_WORKERS", default_value_t = 1)]
    pub workers: usize,
}

pub async fn run(args: ConsumeArgs) -> Result<()> {
    let push = WebPushService::new(&VapidConfig {
        contact: args.contact.clone(),
        public_key: args.public_key.clone(),
        private_key: args.private_key.clone(),
    })
    .context("loading VAPID credentials")?;

    let store = PostgresSubscriptionStore::connect(&args.subscription_store_uri, &args.subscription_table)
        .await
        .context("connecting to the subscription store")?;

    let queue = PostgresQueue::connect(&args.queue.uri, args.queue.options())
        .await
        .context("connecting to the durable queue")?;

    let consumer = Arc::new(QueueConsumer::new(
        Arc::new(queue),
        SubscriptionMatcher::new(Arc::new(store)),
        NotificationDispatcher::new(
            Arc::new(push),
            DispatcherConfig {
                ttl: Duration::from_secs(args.ttl_secs),
                concurrency: args.concurrency.max(1),
                ..DispatcherConfig::default()
            },
        ),
        ConsumerConfig {
            ack_mode: args.ack_mode,
            max_deliveries: args.max_deliveries.max(1),
            ..ConsumerConfig::default()
        },
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut workers = JoinSet::new();
    for worker in 0..args.workers.max(1) {
        let consumer = consumer.clone();
        let mut stop = stop_rx.clone();
        workers.spawn(async move {
            let stopped = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            let result = consumer.run(stopped).await;
            (worker, result)
        });
    }
    info!(workers = args.workers.max(1), ack_mode = %args.ack_mode, "consumer started");

    let mut first_error = None;
    tokio::select! {
        _ = crate::shutdown_signal() => {}
        Some(joined) = workers.join_next() => {
            // A worker only returns early when the queue cannot be declared.
            record(joined, &mut first_error);
        }
    }

    let _ = stop_tx.send(true);
    while let Some(joined) = workers.join_next().await {
        record(joined, &mut first_error);
    }

    info!(metrics = ?consumer.metrics(), "consumer stopped");
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn record(
    joined: Result<(usize, Result<(), alertrelay_core::error::RelayError>), tokio::task::JoinError>,
    first_error: &mut Option<anyhow::Error>,
) {
    let err = match joined {
        Ok((_, Ok(()))) => return,
        Ok((worker, Err(e))) => anyhow::Error::new(e).context(format!("consumer worker {worker} failed")),
        Err(e) => anyhow::Error::new(e).context("consumer worker panicked"),
    };
    error!(error = %format!("{err:#}"), "consumer worker ended");
    first_error.get_or_insert(err);
}
