use crate::error::{Result, StowageError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const DIGEST_LEN: usize = 32;

/// SHA-256 of a chunk's plaintext; the chunk's identity in the store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkDigest([u8; DIGEST_LEN]);

impl ChunkDigest {
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Four-hex-character shard directory used in chunk keys.
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..2])
    }

    /// Verify that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::compute(data);
        if actual != *self {
            return Err(StowageError::HashMismatch {
                expected: self.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }
}

impl FromStr for ChunkDigest {
    type Err = StowageError;

    fn from_str(value: &str) -> Result<Self> {
        if value.len() != DIGEST_LEN * 2 {
            return Err(StowageError::InvalidRequest(format!(
                "invalid chunk digest length: {}",
                value.len()
            )));
        }
        if value.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(StowageError::InvalidRequest(format!(
                "chunk digest must be lowercase hex: {}",
                value
            )));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(value, &mut bytes).map_err(|error| {
            StowageError::InvalidRequest(format!("invalid chunk digest {}: {}", value, error))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkDigest({})", self.to_hex())
    }
}

impl Serialize for ChunkDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
