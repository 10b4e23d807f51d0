use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::CaseworkError;

/// 32-byte BLAKE3 hash.
pub type Hash = [u8; 32];

/// 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// Identifier of a transition: BLAKE3 over the borsh encoding of its proposal.
pub type TransitionId = Hash;

/// Stable identifier of a case, assigned once when the case is opened.
///
/// Carries the 16 bytes of a random (v4) UUID and renders as the usual
/// hyphenated UUID string.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct CaseId(pub [u8; 16]);

impl CaseId {
    /// Generate a fresh random case ID.
    pub fn random() -> Self {
        CaseId(uuid::Uuid::new_v4().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0).hyphenated())
    }
}

impl fmt::Debug for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CaseId({})", self)
    }
}

impl FromStr for CaseId {
    type Err = CaseworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = uuid::Uuid::try_parse(s).map_err(|e| CaseworkError::InvalidCaseId {
            reason: e.to_string(),
        })?;
        Ok(CaseId(parsed.into_bytes()))
    }
}

/// Short hex rendering of a hash or key for log lines.
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

/// Serde helper for [u8; 64] fields.
pub mod serde_sig {
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: Vec<u8> = Vec::deserialize(deserializer)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes for signature"))
    }
}
