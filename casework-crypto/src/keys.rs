use ed25519_dalek::{Signer, Verifier};

use casework_types::error::CaseworkError;
use casework_types::primitives::{short_hex, PublicKey, Signature};

/// Wrapper around an Ed25519 keypair.
pub struct Keypair {
    inner: ed25519_dalek::SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut csprng);
        Self { inner: signing_key }
    }

    /// Create a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
        Self { inner: signing_key }
    }

    /// Create a keypair from a hex-encoded 32-byte seed.
    pub fn from_hex_seed(seed_hex: &str) -> Result<Self, CaseworkError> {
        let bytes = hex::decode(seed_hex.trim()).map_err(|e| CaseworkError::InvalidSeed {
            reason: e.to_string(),
        })?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CaseworkError::InvalidSeed {
                reason: format!("expected 32 bytes, got {}", v.len()),
            })?;
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key bytes.
    pub fn public_key(&self) -> PublicKey {
        self.inner.verifying_key().to_bytes()
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.inner.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({})", short_hex(&self.public_key()))
    }
}

// SigningKey with the "zeroize" feature wipes key material on drop.

/// Verify an Ed25519 signature.
pub fn verify(
    message: &[u8],
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), CaseworkError> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(pubkey)
        .map_err(|_| CaseworkError::InvalidKeyMaterial)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key
        .verify(message, &sig)
        .map_err(|_| CaseworkError::InvalidSignature {
            signer: short_hex(pubkey),
        })
}

/// Verify several signatures over the same message.
///
/// Tries ed25519-dalek batch verification first and falls back to
/// one-by-one verification to name the failing signer.
pub fn verify_all(
    message: &[u8],
    signatures: &[(PublicKey, Signature)],
) -> Result<(), CaseworkError> {
    if signatures.is_empty() {
        return Ok(());
    }

    let mut verifying_keys = Vec::with_capacity(signatures.len());
    let mut dalek_sigs = Vec::with_capacity(signatures.len());
    for (pk, sig) in signatures {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(pk).map_err(|_| {
            CaseworkError::InvalidSignature {
                signer: short_hex(pk),
            }
        })?;
        verifying_keys.push(vk);
        dalek_sigs.push(ed25519_dalek::Signature::from_bytes(sig));
    }

    let messages = vec![message; signatures.len()];
    if ed25519_dalek::verify_batch(&messages, &dalek_sigs, &verifying_keys).is_ok() {
        return Ok(());
    }

    for ((pk, _), (sig, vk)) in signatures
        .iter()
        .zip(dalek_sigs.iter().zip(verifying_keys.iter()))
    {
        if vk.verify(message, sig).is_err() {
            return Err(CaseworkError::InvalidSignature {
                signer: short_hex(pk),
            });
        }
    }

    Ok(())
}
