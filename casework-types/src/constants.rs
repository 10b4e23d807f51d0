// ─── Hashing Domains ─────────────────────────────────────────────────────────

/// BLAKE3 derive-key context for transition IDs.
pub const TRANSITION_ID_DOMAIN: &str = "casework 2024 transition id";

/// BLAKE3 derive-key context for identity certificate signing data.
pub const CERTIFICATE_DOMAIN: &str = "casework 2024 identity certificate";

/// BLAKE3 derive-key context for recorded-output digests kept by the notary.
pub const OUTPUT_DIGEST_DOMAIN: &str = "casework 2024 output digest";

// ─── Identity Limits ────────────────────────────────────────────────────────

/// Maximum length of a party name in bytes.
pub const MAX_PARTY_NAME_LEN: usize = 128;

// ─── Session Parameters ──────────────────────────────────────────────────────

/// Wire protocol version carried as the first byte of every session frame.
/// Bump this whenever a breaking change is made to `SessionMessage`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum size of an encoded session frame in bytes.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Buffered frames per direction of a session channel.
pub const SESSION_CHANNEL_CAPACITY: usize = 16;

/// Buffered inbound session requests per node.
pub const INBOUND_SESSION_CAPACITY: usize = 64;
