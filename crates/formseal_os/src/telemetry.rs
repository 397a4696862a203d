#![forbid(unsafe_code)]

//! Tracing initialisation. Events carry ids, actions and counts; field
//! values, keys and plaintext never reach a log line.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::env_flag;

pub const LOG_FILTER_ENV: &str = "FORMSEAL_LOG";
pub const LOG_JSON_ENV: &str = "FORMSEAL_LOG_JSON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl TelemetryConfig {
    pub fn mvp_v1() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::mvp_v1();
        Self {
            log_level: defaults.log_level,
            json_logs: env_flag(LOG_JSON_ENV).unwrap_or(defaults.json_logs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("tracing subscriber init failed: {0}")]
    Init(String),
}

/// Installs the global subscriber. `FORMSEAL_LOG` overrides the configured
/// level with a full filter directive.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
            .map_err(|err| TelemetryError::Init(err.to_string()))
    } else {
        subscriber
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Init(err.to_string()))
    }
}
