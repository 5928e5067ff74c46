//! alertrelay-dispatch: consumer side of AlertRelay.
//!
//! ```text
//! DurableQueue::receive
//!       │
//!       ▼
//! QueueConsumer ── decode ── dedup guard
//!       │
//!       ▼
//! SubscriptionMatcher::find_subscribers(world)   ← SubscriptionStore
//!       │
//!       ▼
//! NotificationDispatcher::dispatch               → PushService (web push)
//!       │   one future per subscriber, at most `concurrency` in flight
//!       ▼
//! DispatchReport → ack
//! ```

pub mod consumer;
pub mod dispatcher;
pub mod matcher;
pub mod store;
pub mod webpush;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use consumer::{AckMode, ConsumerConfig, ConsumerMetrics, ProcessOutcome, QueueConsumer};
pub use dispatcher::{DispatchReport, DispatcherConfig, NotificationDispatcher};
pub use matcher::SubscriptionMatcher;
pub use store::InMemorySubscriptionStore;
pub use webpush::{VapidConfig, WebPushService};

#[cfg(feature = "postgres")]
pub use postgres::PostgresSubscriptionStore;
