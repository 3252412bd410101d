//! Environment-driven configuration and logging bootstrap for the DUE sync
//! workspace: defaults layered with env overrides, plus a shared
//! `init_logging` entry point.

mod config;
mod logging;

pub use config::{Config, ConfigError, ConfigResult, DbConfig, FeatureFlags};
pub use logging::init_logging;
