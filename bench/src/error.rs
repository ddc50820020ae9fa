//! Error types for the benchmark.

use crate::client::{self, KeyType};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while configuring or running a benchmark.
///
/// Only [Error::Operation] and [Error::Inconsistent] are recoverable (see
/// [Error::is_recoverable]): they describe a single failed iteration and never end a run.
/// Everything else aborts either the whole run (configuration and setup) or the task that
/// owns the failing resource (persistence).
#[derive(Debug, Error)]
pub enum Error {
    /// A flag or combination of flags is invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A node endpoint could not be parsed
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// A client handle could not be constructed
    #[error("failed to connect to player {player}: {source}")]
    Connect {
        player: u32,
        #[source]
        source: client::Error,
    },

    /// Distributed key generation failed
    #[error("key generation failed for {key_type}: {source}")]
    KeyGeneration {
        key_type: KeyType,
        #[source]
        source: Box<Error>,
    },

    /// One participant failed a collective operation
    #[error("client {player} failed: {source}")]
    Operation {
        player: u32,
        #[source]
        source: client::Error,
    },

    /// Participants returned different results for the same collective operation
    #[error("participants disagree: {0}")]
    Inconsistent(String),

    /// A presignature file could not be read or written
    #[error("presignature file {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A presignature file could not be encoded or decoded
    #[error("presignature file {path:?} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A presignature file holds identifiers for a different key type
    #[error("presignature file {path:?} does not hold {expected} presignatures")]
    WrongKeyType { path: PathBuf, expected: KeyType },

    /// The entropy source failed
    #[error("sampling failed: {0}")]
    Entropy(#[from] threshold_random::Error),

    /// A client task panicked or was cancelled
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Returns `true` if the error only affects the current iteration.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Operation { .. } | Error::Inconsistent(_))
    }
}
