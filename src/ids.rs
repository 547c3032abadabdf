//! Opaque 32-byte identifier type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an [`Id`] in bytes (32 bytes / 256 bits).
pub const ID_LEN: usize = 32;

/// A 32-byte identifier for vertices, transactions, and input resources.
///
/// Ids are opaque to the consensus core; callers typically derive them
/// from the SHA-256 hash of an entity's contents.
///
/// # Examples
///
/// ```
/// use avalanche_dag::Id;
///
/// let id = Id::from_bytes([0u8; 32]);
/// assert!(id.is_empty());
///
/// let id = Id::from_hash(b"some payload");
/// assert!(!id.is_empty());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Id([u8; ID_LEN]);

/// Errors that can occur when parsing an [`Id`].
#[derive(Debug, Error)]
pub enum IdError {
    /// The hex decoding failed.
    #[error("hex decoding failed: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The decoded bytes have the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

impl Id {
    /// The empty (zero) id.
    pub const EMPTY: Self = Self([0u8; ID_LEN]);

    /// Creates an id from a 32-byte array.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates an id from a slice, returning an error if the length is wrong.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidLength` if the slice is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        if bytes.len() != ID_LEN {
            return Err(IdError::InvalidLength {
                expected: ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; ID_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Computes an id from the SHA-256 hash of the given bytes.
    #[must_use]
    pub fn from_hash(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut arr = [0u8; ID_LEN];
        arr.copy_from_slice(&digest);
        Self(arr)
    }

    /// Returns the id as a byte array reference.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Returns true if this is the empty (zero) id.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ID_LEN]
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight leading bytes are enough to tell ids apart in logs.
        write!(f, "Id({}..)", hex::encode(&self.0[..8]))
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ID_LEN]> for Id {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Id> for [u8; ID_LEN] {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}
