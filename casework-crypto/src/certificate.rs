use casework_types::constants::CERTIFICATE_DOMAIN;
use casework_types::error::CaseworkError;
use casework_types::identity::{AnonymousParty, IdentityCertificate, Party};
use casework_types::primitives::Hash;

use crate::hash::blake3_hash_domain_multi;
use crate::keys::{verify, Keypair};

/// Data signed by a party's well-known key to vouch for a pseudonym.
pub fn certificate_signing_data(pseudonym: &AnonymousParty, party: &Party) -> Hash {
    blake3_hash_domain_multi(
        CERTIFICATE_DOMAIN,
        &[
            &pseudonym.owning_key,
            &(party.name.len() as u32).to_le_bytes(),
            party.name.as_bytes(),
            &party.owning_key,
        ],
    )
}

/// Issue a certificate binding `pseudonym` to `party`.
///
/// `well_known` must be the party's own keypair.
pub fn issue_certificate(
    party: &Party,
    well_known: &Keypair,
    pseudonym: AnonymousParty,
) -> Result<IdentityCertificate, CaseworkError> {
    if well_known.public_key() != party.owning_key {
        return Err(CaseworkError::InvalidCertificate {
            party: party.name.clone(),
            reason: "signing key is not the party's well-known key".to_string(),
        });
    }
    let data = certificate_signing_data(&pseudonym, party);
    Ok(IdentityCertificate {
        pseudonym,
        party: party.clone(),
        signature: well_known.sign(&data),
    })
}

/// Check that a certificate was signed by the party it names.
pub fn verify_certificate(cert: &IdentityCertificate) -> Result<(), CaseworkError> {
    let data = certificate_signing_data(&cert.pseudonym, &cert.party);
    verify(&data, &cert.signature, &cert.party.owning_key).map_err(|_| {
        CaseworkError::InvalidCertificate {
            party: cert.party.name.clone(),
            reason: "signature does not verify".to_string(),
        }
    })
}
