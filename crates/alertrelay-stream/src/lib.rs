//! # alertrelay-stream
//!
//! Producer side of AlertRelay: listens to the PlanetSide 2 Census event
//! stream and queues every alert start on a recognised continent.
//!
//! ## Architecture
//! ```text
//! CensusClient (background Tokio task, owns the WebSocket)
//!       │  reconnect with backoff, re-subscribe on connect, drop duplicates
//!       ▼
//! mpsc::UnboundedReceiver<StreamSignal>
//!       │
//!       ▼
//! EventSource ──(every resubscribe_interval)──▶ StreamCommand::Resubscribe
//!       │
//!       ▼
//! EventFilter::check → QueuePublisher::publish
//! ```

pub mod census;
pub mod client;
pub mod source;

pub use census::{CensusConfig, CensusMessage};
pub use client::{to_signal, CensusClient, StreamCommand, StreamSignal};
pub use source::{EventSource, SourceConfig, SourceMetrics, MIN_RESUBSCRIBE_INTERVAL};
