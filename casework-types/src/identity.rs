use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::primitives::*;

/// A durable, well-known identity: a name bound to a long-lived key.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Party {
    /// Human-readable name, unique on the network.
    pub name: String,
    /// The party's well-known public key.
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A pseudonymous identity: a one-time key with no name attached.
///
/// Only nodes holding an [`IdentityCertificate`] for the key can link it
/// back to a [`Party`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct AnonymousParty {
    pub owning_key: PublicKey,
}

impl AnonymousParty {
    pub fn new(owning_key: PublicKey) -> Self {
        Self { owning_key }
    }
}

impl fmt::Display for AnonymousParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anonymous({})", short_hex(&self.owning_key))
    }
}

/// Binds a pseudonym to a durable identity.
///
/// The signature is made by the party's well-known key over the certificate
/// signing data (see `casework_crypto::certificate`).
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct IdentityCertificate {
    pub pseudonym: AnonymousParty,
    pub party: Party,
    #[serde(with = "crate::primitives::serde_sig")]
    pub signature: Signature,
}
