//! Shared plumbing for the agent inference services
//!
//! - [`config`]: environment and TOML driven runtime configuration
//! - [`metrics`]: Prometheus registry exposed on `/metrics`
//! - [`telemetry`]: tracing subscriber setup for the binaries

pub mod config;
pub mod metrics;
pub mod telemetry;

pub use config::{AppConfig, ClassifierSettings, ConfigFile, DefaultModelSettings};
pub use metrics::Metrics;
