//! PostgreSQL subscription store.
//!
//! Read-only: the web front end owns the table and writes records into it.
//! Expected shape:
//!
//! ```sql
//! CREATE TABLE notify_subscriptions (
//!     endpoint        TEXT PRIMARY KEY,
//!     servers         TEXT[] NOT NULL,
//!     expiration_time BIGINT,
//!     auth            TEXT NOT NULL,
//!     p256dh          TEXT NOT NULL
//! );
//! CREATE INDEX ON notify_subscriptions USING GIN (servers);
//! ```
//!
//! # Feature Flag
//! Requires the `postgres` feature.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use alertrelay_core::error::RelayError;
use alertrelay_core::event::WorldId;
use alertrelay_core::subscription::{PushKeys, SubscriptionRecord, SubscriptionStore};

/// Default subscription table.
pub const DEFAULT_TABLE: &str = "notify_subscriptions";

pub struct PostgresSubscriptionStore {
    pool: PgPool,
    table: String,
    query: String,
}

impl PostgresSubscriptionStore {
    /// Connect and verify that `table` is reachable.
    pub async fn connect(url: &str, table: &str) -> Result<Self, RelayError> {
        if !is_identifier(table) {
            return Err(RelayError::Config(format!("invalid subscription table name: {table:?}")));
        }

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| RelayError::Lookup(format!("subscription store connect: {e}")))?;

        let store = Self {
            pool,
            table: table.to_string(),
            query: format!(
                "SELECT endpoint, servers, expiration_time, auth, p256dh FROM {table} WHERE $1 = ANY(servers)"
            ),
        };

        sqlx::query(&format!("SELECT 1 FROM {} LIMIT 1", store.table))
            .fetch_optional(&store.pool)
            .await
            .map_err(|e| RelayError::Lookup(format!("subscription table {}: {e}", store.table)))?;

        info!(table = %store.table, "subscription store connected");
        Ok(store)
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn find_by_world(&self, world: &WorldId) -> Result<Vec<SubscriptionRecord>, RelayError> {
        let rows = sqlx::query(&self.query)
            .bind(world.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RelayError::Lookup(e.to_string()))?;

        rows.iter().map(row_to_record).collect()
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

fn row_to_record(row: &PgRow) -> Result<SubscriptionRecord, RelayError> {
    // A row that does not match the expected columns will not heal on retry.
    let lookup = |e: sqlx::Error| RelayError::Config(format!("subscription row: {e}"));
    let servers: Vec<String> = row.try_get("servers").map_err(lookup)?;
    Ok(SubscriptionRecord {
        servers: servers.into_iter().map(WorldId::from).collect(),
        endpoint: row.try_get("endpoint").map_err(lookup)?,
        expiration_time: row.try_get("expiration_time").map_err(lookup)?,
        keys: PushKeys {
            auth: row.try_get("auth").map_err(lookup)?,
            p256dh: row.try_get("p256dh").map_err(lookup)?,
        },
    })
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
