//! alertrelay-observability: logging initialisation shared by every
//! AlertRelay binary.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
