//! Query service: the asynchronous, non-blocking raycast API exposed to
//! guest scripts, plus the config file that sizes it.
//!
//! # Invariants
//! - `submit` never blocks; a full queue is reported as `Busy`.
//! - Every accepted query yields exactly one delivery attempt, unless it is
//!   still pending when the shutdown deadline passes.
//! - Invalid input never reaches the worker pool.

mod config;
mod service;
mod sink;

pub use config::{Config, ConfigError, ServiceConfig};
pub use service::{QueryService, ServiceError, ServiceStats};
pub use sink::{ChannelSink, DeliveryError, EventSink};

pub fn crate_info() -> &'static str {
    "blockray-service v0.1.0"
}
