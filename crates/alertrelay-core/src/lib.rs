//! alertrelay-core: foundation types and traits for AlertRelay.
//!
//! # Overview
//!
//! AlertRelay forwards PlanetSide 2 alert (`MetagameEvent`) starts to browser
//! push subscribers. The pipeline is split across two processes joined by a
//! durable queue:
//!
//! ```text
//! Census stream → EventSource → EventFilter → QueuePublisher
//!                                                  │
//!                                          [durable queue]
//!                                                  │
//! QueueConsumer → SubscriptionMatcher → NotificationDispatcher → push service
//! ```
//!
//! The core crate defines:
//!
//! - [`GameEvent`]: decoded upstream event with its raw form
//! - [`EventFilter`]: the relay rule (started + recognised zone)
//! - [`NotificationPayload`]: title/body derived from the name tables
//! - [`DurableQueue`], [`SubscriptionStore`], [`PushService`]: the seams
//!   every backend implements
//! - [`RelayError`] / [`DeliveryError`]: structured error types

pub mod dedup;
pub mod error;
pub mod event;
pub mod filter;
pub mod names;
pub mod payload;
pub mod push;
pub mod queue;
pub mod subscription;

pub use dedup::RecentKeys;
pub use error::{DeliveryError, FailureKind, RelayError};
pub use event::{GameEvent, WorldId, ZoneId};
pub use filter::{EventFilter, FilterVerdict};
pub use payload::NotificationPayload;
pub use push::PushService;
pub use queue::{DeliveryTag, DurableQueue, QueuedEnvelope};
pub use subscription::{PushKeys, SubscriptionRecord, SubscriptionStore};
