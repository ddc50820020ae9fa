//! Drive one node of a threshold signing service.
//!
//! A [Client] addresses a single participant. Collective operations (key generation, signing,
//! presignature generation) only complete once every participant named in the [Session] has
//! been invoked with the identical descriptor, so callers fan the same call out to all
//! participants concurrently (see [crate::pool]).

use serde::Serialize;
use std::{fmt, future::Future};
use thiserror::Error;

pub mod http;

/// Errors returned by a single participant.
#[derive(Debug, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Family of keys (and therefore of operations) exercised by a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyType {
    /// ECDSA over secp256k1, signing a SHA-256 digest.
    Ecdsa,
    /// Schnorr-style Ed25519, signing the raw message.
    Ed25519,
}

impl KeyType {
    /// All key types, in reporting order.
    pub const ALL: [KeyType; 2] = [KeyType::Ecdsa, KeyType::Ed25519];

    /// Curve requested during key generation.
    pub const fn curve(&self) -> &'static str {
        match self {
            KeyType::Ecdsa => "secp256k1",
            KeyType::Ed25519 => "ED-25519",
        }
    }

    /// Lowercase name used in file names and request paths.
    pub const fn name(&self) -> &'static str {
        match self {
            KeyType::Ecdsa => "ecdsa",
            KeyType::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Ecdsa => write!(f, "ECDSA"),
            KeyType::Ed25519 => write!(f, "Ed25519"),
        }
    }
}

/// Identifier and participants of one collective operation.
///
/// Participants are kept sorted and deduplicated so that every node sees the same
/// descriptor. A [Session] cannot be modified after construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Session {
    id: String,
    players: Vec<u32>,
}

impl Session {
    /// Create a session over `players` (order is irrelevant).
    pub fn new(id: String, mut players: Vec<u32>) -> Self {
        players.sort_unstable();
        players.dedup();
        Self { id, players }
    }

    /// Globally unique session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Participants in ascending order.
    pub fn players(&self) -> &[u32] {
        &self.players
    }
}

/// Interface to one participant of a threshold signing service.
pub trait Client: Clone + Send + Sync + 'static {
    /// Jointly generate a key named `key_id` shared by all session participants.
    fn generate_key(
        &self,
        key_type: KeyType,
        session: &Session,
        threshold: u32,
        key_id: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Jointly sign `message` with the child of `key_id` at `path`.
    fn sign(
        &self,
        key_type: KeyType,
        session: &Session,
        key_id: &str,
        path: &[u32],
        message: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Jointly generate `count` presignatures for `key_id`, returning their identifiers.
    fn generate_presignatures(
        &self,
        key_type: KeyType,
        session: &Session,
        key_id: &str,
        count: u64,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send;

    /// Complete a signature using the single-use presignature `presignature_id`.
    fn sign_with_presignature(
        &self,
        key_type: KeyType,
        key_id: &str,
        presignature_id: &str,
        path: &[u32],
        message: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Fetch the public key of the child of `key_id` at `path`.
    fn public_key(
        &self,
        key_type: KeyType,
        key_id: &str,
        path: &[u32],
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}
