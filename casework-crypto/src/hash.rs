use casework_types::primitives::Hash;

/// Compute a BLAKE3 hash with domain separation.
/// The context string keeps hashes made for different purposes apart.
pub fn blake3_hash_domain(context: &str, data: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash multiple pieces of data together under a domain.
pub fn blake3_hash_domain_multi(context: &str, parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
