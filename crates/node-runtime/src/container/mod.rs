//! Startup container: configuration collected once from the environment.

pub mod config;

pub use config::{ConfigError, GatewayConfig};
