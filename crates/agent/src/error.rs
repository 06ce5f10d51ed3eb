use thiserror::Error;

use crate::client::ClientError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity store error: {0}")]
    Identity(#[from] std::io::Error),

    #[error("Corrupt identity file: {0}")]
    CorruptIdentity(#[from] serde_json::Error),

    #[error("Device is not enrolled; run `emi-agent enroll <device-id>` first")]
    NotEnrolled,

    #[error("Device {0} is not registered on the server")]
    UnknownDevice(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}
