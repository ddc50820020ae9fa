//! Benchmark parameters.

use crate::{client::KeyType, endpoint::Endpoint, Error};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

/// Default length of a run.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);

/// Default number of presignatures each client tries to produce.
pub const DEFAULT_PRESIG_COUNT: usize = 100;

/// Default number of presignatures requested per collective call.
pub const DEFAULT_PRESIG_BATCH_SIZE: u64 = 5;

/// Default directory holding presignature files.
pub const DEFAULT_PRESIG_DIR: &str = "./presigs";

/// Minimum number of nodes required to run a threshold protocol.
pub const MIN_NODES: usize = 2;

/// Workload exercised by every client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Interactive signing over a random subset of signers.
    Sign,
    /// Offline presignature production over the full set of nodes.
    PresigGen,
    /// Signing that consumes presignatures produced by [Operation::PresigGen].
    OnlineSign,
    /// Public key derivation.
    GetPub,
}

impl Operation {
    /// Whether the operation needs fresh keys before the timed loop starts.
    pub const fn generates_keys(&self) -> bool {
        !matches!(self, Operation::OnlineSign)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Sign => "sign",
            Operation::PresigGen => "presigGen",
            Operation::OnlineSign => "onlineSign",
            Operation::GetPub => "getpub",
        }
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sign" => Ok(Operation::Sign),
            "presigGen" => Ok(Operation::PresigGen),
            "onlineSign" => Ok(Operation::OnlineSign),
            "getpub" => Ok(Operation::GetPub),
            other => Err(Error::InvalidConfig(format!("unknown operation: {other}"))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run needs to know, fixed before any client starts.
///
/// `threshold` and `signers` may be left at `0` and are filled in by [Config::validate].
#[derive(Clone, Debug)]
pub struct Config {
    pub operation: Operation,
    pub nodes: Vec<Endpoint>,
    pub ecdsa_clients: usize,
    pub ed25519_clients: usize,
    pub threshold: u32,
    pub signers: usize,
    pub duration: Duration,
    pub delay: Duration,
    pub show_progress: bool,
    pub presig_count: usize,
    pub presig_batch_size: u64,
    pub presig_dir: PathBuf,
}

impl Config {
    /// Create a configuration for `nodes` with every other parameter at its default.
    pub fn new(operation: Operation, nodes: Vec<Endpoint>) -> Self {
        Self {
            operation,
            nodes,
            ecdsa_clients: 0,
            ed25519_clients: 0,
            threshold: 0,
            signers: 0,
            duration: DEFAULT_DURATION,
            delay: Duration::ZERO,
            show_progress: false,
            presig_count: DEFAULT_PRESIG_COUNT,
            presig_batch_size: DEFAULT_PRESIG_BATCH_SIZE,
            presig_dir: PathBuf::from(DEFAULT_PRESIG_DIR),
        }
    }

    /// Number of clients running operations with `key_type`.
    pub fn clients(&self, key_type: KeyType) -> usize {
        match key_type {
            KeyType::Ecdsa => self.ecdsa_clients,
            KeyType::Ed25519 => self.ed25519_clients,
        }
    }

    /// Key types with at least one client.
    pub fn key_types(&self) -> impl Iterator<Item = KeyType> + '_ {
        KeyType::ALL
            .into_iter()
            .filter(move |key_type| self.clients(*key_type) > 0)
    }

    /// Fill in derived defaults and reject invalid combinations.
    pub fn validate(mut self) -> Result<Self, Error> {
        let nodes = self.nodes.len();
        if nodes < MIN_NODES {
            return Err(Error::InvalidConfig(format!(
                "at least {MIN_NODES} nodes are required, got {nodes}"
            )));
        }
        let max_threshold = u32::try_from(nodes - 1)
            .map_err(|_| Error::InvalidConfig(format!("too many nodes: {nodes}")))?;
        if self.threshold == 0 {
            self.threshold = max_threshold;
        }
        if self.threshold > max_threshold {
            return Err(Error::InvalidConfig(format!(
                "threshold must be in [1, {max_threshold}], got {}",
                self.threshold
            )));
        }
        let min_signers = self.threshold as usize + 1;
        if self.signers == 0 {
            self.signers = min_signers;
        }
        if self.signers < min_signers || self.signers > nodes {
            return Err(Error::InvalidConfig(format!(
                "signers must be in [{min_signers}, {nodes}], got {}",
                self.signers
            )));
        }
        if self.ecdsa_clients + self.ed25519_clients == 0 {
            return Err(Error::InvalidConfig("at least one client is required".into()));
        }
        if self.presig_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "presignature batch size must be positive".into(),
            ));
        }
        Ok(self)
    }
}

/// Parse a duration such as `300ms`, `1.5h` or `2h45m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0` is accepted.
pub fn parse_duration(raw: &str) -> Result<Duration, Error> {
    let invalid = || Error::InvalidConfig(format!("invalid duration: {raw:?}"));
    if raw == "0" {
        return Ok(Duration::ZERO);
    }
    if raw.is_empty() {
        return Err(invalid());
    }

    let mut rest = raw;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let split = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(split);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;
        let segment = Duration::from_nanos((value * nanos_per_unit).round() as u64);
        total = total.checked_add(segment).ok_or_else(invalid)?;
        rest = tail;
    }
    Ok(total)
}
