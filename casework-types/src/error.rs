use thiserror::Error;

/// Errors shared by the casework type, crypto, and encoding layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaseworkError {
    // ─── Crypto Errors ───────────────────────────────────────────────────────
    #[error("invalid key material")]
    InvalidKeyMaterial,

    #[error("invalid signature by key {signer}")]
    InvalidSignature { signer: String },

    #[error("invalid identity certificate for {party}: {reason}")]
    InvalidCertificate { party: String, reason: String },

    #[error("invalid key seed: {reason}")]
    InvalidSeed { reason: String },

    // ─── Identifier Errors ───────────────────────────────────────────────────
    #[error("invalid case id: {reason}")]
    InvalidCaseId { reason: String },

    // ─── Serialization Errors ────────────────────────────────────────────────
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("deserialization error: {reason}")]
    DeserializationError { reason: String },

    // ─── Wire Errors ─────────────────────────────────────────────────────────
    #[error("message too large: {size} > {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("invalid message format: {reason}")]
    InvalidMessageFormat { reason: String },
}
