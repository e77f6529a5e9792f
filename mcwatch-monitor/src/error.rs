use std::time::Duration;

use mcwatch_store::codec::ParseCodecError;
use thiserror::Error;

/// Failure of a single status query.
#[derive(Debug, Error)]
pub enum StatusError {
  #[error("failed to connect to {addr}: {source}")]
  Connect {
    addr: String,
    source: std::io::Error,
  },

  #[error("connection error: {0}")]
  Io(#[from] std::io::Error),

  #[error("no response within {0:?}")]
  Timeout(Duration),

  #[error("protocol error: {0}")]
  Protocol(String),

  #[error("malformed status response: {0}")]
  Json(#[from] serde_json::Error),
}

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
  #[error("{0} must be greater than zero")]
  Zero(&'static str),

  #[error("{0} must be a positive number of seconds")]
  NonPositive(&'static str),

  #[error("invalid server address {0:?}")]
  Address(String),

  #[error("invalid data save format: {0}")]
  SaveFormat(#[from] ParseCodecError),
}
