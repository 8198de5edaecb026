//! Recognised settings and their defaults.
//!
//! Environment variables prefixed with `KERNEL_` override the defaults, e.g.
//! `KERNEL_APP_MONGODB_DSN` or `KERNEL_LIB_MAX_RETRIES`. The DSN and the
//! Prometheus options are consumed by the server wiring; the `lib_*` options
//! parameterise the retry decorator.

use config::ConfigError;
use serde::Deserialize;

use crate::store::{DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RETRIES};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Backend DSN; may list multiple hosts separated by whitespace.
    pub app_mongodb_dsn: String,
    pub app_mongodb_replicaset: String,
    pub app_mongodb_readpreference: String,
    pub app_prometheus_enabled: bool,
    pub app_prometheus_port: u16,
    pub lib_max_retries: u32,
    pub lib_backoff_factor: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_mongodb_dsn: "mongodb://db:27017".to_string(),
            app_mongodb_replicaset: String::new(),
            app_mongodb_readpreference: "secondaryPreferred".to_string(),
            app_prometheus_enabled: true,
            app_prometheus_port: 8087,
            lib_max_retries: DEFAULT_MAX_RETRIES,
            lib_backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl Settings {
    /// The DSN split into individual hosts.
    pub fn dsn_hosts(&self) -> Vec<&str> {
        self.app_mongodb_dsn.split_whitespace().collect()
    }
}

pub fn load_settings() -> Result<Settings, ConfigError> {
    let defaults = Settings::default();
    config::Config::builder()
        .set_default("app_mongodb_dsn", defaults.app_mongodb_dsn)?
        .set_default("app_mongodb_replicaset", defaults.app_mongodb_replicaset)?
        .set_default(
            "app_mongodb_readpreference",
            defaults.app_mongodb_readpreference,
        )?
        .set_default("app_prometheus_enabled", defaults.app_prometheus_enabled)?
        .set_default(
            "app_prometheus_port",
            i64::from(defaults.app_prometheus_port),
        )?
        .set_default("lib_max_retries", i64::from(defaults.lib_max_retries))?
        .set_default("lib_backoff_factor", defaults.lib_backoff_factor)?
        .add_source(config::Environment::with_prefix("KERNEL").try_parsing(true))
        .build()?
        .try_deserialize::<Settings>()
}
