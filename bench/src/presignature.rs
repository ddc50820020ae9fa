//! Presignatures produced by one client, persisted between the offline and online phases.
//!
//! Each client owns exactly one [Record] and one file (see [file_name]). Files are JSON objects
//! holding the key identifier under a key-type specific field and the presignature identifiers
//! under `PresigIDs`:
//!
//! ```json
//! {
//!   "ECDSAKeyID": "Xc8TgWq0LmZ1eRkB2uVa",
//!   "PresigIDs": [
//!     "p-1",
//!     "p-2"
//!   ]
//! }
//! ```

use crate::{client::KeyType, Error};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum File {
    Ecdsa {
        #[serde(rename = "ECDSAKeyID")]
        key_id: String,
        #[serde(rename = "PresigIDs", default, deserialize_with = "nullable")]
        ids: Vec<String>,
    },
    Ed25519 {
        #[serde(rename = "Ed25519KeyID")]
        key_id: String,
        #[serde(rename = "PresigIDs", default, deserialize_with = "nullable")]
        ids: Vec<String>,
    },
}

/// Accept `null` for an empty list.
fn nullable<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Name of the file holding the presignatures of `client`.
pub fn file_name(key_type: KeyType, client: usize) -> String {
    format!("presig-{}-client{client:04}.txt", key_type.name())
}

/// Location of the file holding the presignatures of `client` in `dir`.
pub fn path(dir: &Path, key_type: KeyType, client: usize) -> PathBuf {
    dir.join(file_name(key_type, client))
}

/// Presignature identifiers for one key, consumed front to back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    key_type: KeyType,
    key_id: String,
    ids: VecDeque<String>,
}

impl Record {
    /// Create an empty record for `key_id`.
    pub fn new(key_type: KeyType, key_id: String) -> Self {
        Self {
            key_type,
            key_id,
            ids: VecDeque::new(),
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Number of unconsumed presignatures.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append a batch of freshly generated presignatures.
    pub fn extend(&mut self, ids: impl IntoIterator<Item = String>) {
        self.ids.extend(ids);
    }

    /// Remove and return the oldest unconsumed presignature.
    pub fn consume(&mut self) -> Option<String> {
        self.ids.pop_front()
    }

    /// Write the record to `path`, replacing any previous content.
    pub fn store(&self, path: &Path) -> Result<(), Error> {
        let key_id = self.key_id.clone();
        let ids = self.ids.iter().cloned().collect();
        let file = match self.key_type {
            KeyType::Ecdsa => File::Ecdsa { key_id, ids },
            KeyType::Ed25519 => File::Ed25519 { key_id, ids },
        };
        let encoded = serde_json::to_vec_pretty(&file).map_err(|source| Error::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, encoded).map_err(|source| Error::Persistence {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read a record of `key_type` from `path`.
    pub fn load(path: &Path, key_type: KeyType) -> Result<Self, Error> {
        let encoded = fs::read(path).map_err(|source| Error::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        let file: File = serde_json::from_slice(&encoded).map_err(|source| Error::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        let (found, key_id, ids) = match file {
            File::Ecdsa { key_id, ids } => (KeyType::Ecdsa, key_id, ids),
            File::Ed25519 { key_id, ids } => (KeyType::Ed25519, key_id, ids),
        };
        if found != key_type {
            return Err(Error::WrongKeyType {
                path: path.to_path_buf(),
                expected: key_type,
            });
        }
        Ok(Self {
            key_type,
            key_id,
            ids: ids.into(),
        })
    }
}
