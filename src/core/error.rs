//! Error taxonomy for the harvester daemon.
//!
//! Each subsystem (stream subscriber, executor, sequencer, relay) catches
//! errors at its own top-level loop and never lets a fault escape the
//! process. The only errors that terminate the daemon are `Configuration`
//! errors raised during startup.

use std::time::Duration;
use thiserror::Error;

pub type HarvesterResult<T> = Result<T, HarvesterError>;

#[derive(Error, Debug)]
pub enum HarvesterError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("position {id} no longer exists on chain")]
    StaleOpportunity { id: String },

    #[error("transaction simulation failed: {0}")]
    Simulation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures parsing a fixed-layout account buffer. Always recoverable —
/// the caller logs and drops the update.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short: got {got} bytes, need at least {need}")]
    TooShort { got: usize, need: usize },

    #[error("bin step {0} out of range [1, 500]")]
    InvalidBinStep(u16),

    #[error("unrecognized side byte {0}")]
    InvalidSide(u8),
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("node returned an error: {code} {message}")]
    NodeError { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("ping timed out, no pong within {0:?}")]
    PingTimeout(Duration),

    #[error("stream ended unexpectedly")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),
}

impl HarvesterError {
    /// Chain-side "expected empty" conditions (nothing to sweep / deposit)
    /// are demoted to info rather than treated as failures.
    pub fn is_expected_empty(&self) -> bool {
        let msg = self.to_string().to_lowercase();
        msg.contains("nothing to sweep") || msg.contains("nothing to deposit") || msg.contains("no monkes")
    }
}

impl From<std::io::Error> for HarvesterError {
    fn from(err: std::io::Error) -> Self {
        HarvesterError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for HarvesterError {
    fn from(err: serde_json::Error) -> Self {
        HarvesterError::Storage(err.to_string())
    }
}
