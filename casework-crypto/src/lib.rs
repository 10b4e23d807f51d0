//! Cryptographic primitives for the casework ledger.
//!
//! Ed25519 keypairs for well-known and pseudonymous identities, BLAKE3
//! hashing, and the certificates that bind a pseudonym to its owner.

pub mod certificate;
pub mod hash;
pub mod keys;
