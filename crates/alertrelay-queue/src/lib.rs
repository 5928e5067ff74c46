//! alertrelay-queue: durable queue backends for AlertRelay.
//!
//! Backends:
//! - [`memory`]: in-process queue with the same lease/redelivery semantics
//!   (tests, single-process runs)
//! - `postgres`: table-backed queue via `sqlx` (feature `postgres`); leases
//!   with `FOR UPDATE SKIP LOCKED`, wakes consumers with `LISTEN/NOTIFY`
//!
//! [`QueuePublisher`] sits in front of any backend and declares the queue
//! before the first publish.

pub mod memory;
pub mod publisher;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryQueue, InMemoryQueueConfig};
pub use publisher::QueuePublisher;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresQueue, PostgresQueueOptions};
