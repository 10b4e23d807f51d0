use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use casework_crypto::certificate::{issue_certificate, verify_certificate};
use casework_crypto::keys::Keypair;
use casework_types::error::CaseworkError;
use casework_types::identity::{AnonymousParty, IdentityCertificate, Party};
use casework_types::primitives::PublicKey;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unknown party {0}")]
    UnknownParty(String),

    #[error("{0} is not owned by this node")]
    NotOwned(AnonymousParty),

    #[error("cannot resolve {0}")]
    Unresolved(AnonymousParty),

    #[error("certificate error: {0}")]
    Certificate(#[from] CaseworkError),

    #[error("identity exchange failed: {reason}")]
    Exchange { reason: String },
}

/// Pseudonym issuance and resolution as seen by one node.
///
/// Resolution is scoped: a node resolves a pseudonym only if it minted it
/// or was handed a verified certificate for it.
#[async_trait]
pub trait IdentityFacade: Send + Sync {
    /// This node's well-known identity.
    fn me(&self) -> &Party;

    /// Mint a fresh pseudonym for `owner`. Only the caller and the owner
    /// learn the binding.
    async fn mint(&self, owner: &Party) -> Result<AnonymousParty, IdentityError>;

    /// Mint a pseudonym on each side and exchange certificates. Returns
    /// `(ours, theirs)`.
    async fn swap(
        &self,
        counterparty: &Party,
    ) -> Result<(AnonymousParty, AnonymousParty), IdentityError>;

    fn resolve(&self, pseudonym: &AnonymousParty) -> Option<Party>;

    fn certificate(&self, pseudonym: &AnonymousParty) -> Option<IdentityCertificate>;

    /// Verify and store a certificate handed over by another node.
    fn learn(&self, certificate: IdentityCertificate) -> Result<(), IdentityError>;

    /// Whether this node holds the private key for `key`.
    fn owns(&self, key: &PublicKey) -> bool;

    /// The keypair behind a pseudonym this node minted for itself.
    fn signing_key_for(&self, pseudonym: &AnonymousParty) -> Result<Arc<Keypair>, IdentityError>;
}

/// How a node reaches another node's wallet to mint on its behalf.
#[async_trait]
pub trait IdentityExchange: Send + Sync {
    /// Have `owner`'s node mint a pseudonym for itself and return the
    /// certificate. If `disclose` is given, `owner` learns it first.
    async fn mint_remote(
        &self,
        owner: &Party,
        disclose: Option<IdentityCertificate>,
    ) -> Result<IdentityCertificate, IdentityError>;
}

/// A node's local keys and the certificates it has been shown.
pub struct IdentityWallet {
    party: Party,
    keypair: Keypair,
    owned: RwLock<HashMap<PublicKey, Arc<Keypair>>>,
    certificates: RwLock<HashMap<PublicKey, IdentityCertificate>>,
}

impl IdentityWallet {
    pub fn new(name: impl Into<String>, keypair: Keypair) -> Self {
        Self {
            party: Party::new(name, keypair.public_key()),
            keypair,
            owned: RwLock::new(HashMap::new()),
            certificates: RwLock::new(HashMap::new()),
        }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    /// Mint a fresh pseudonym for this node and certify it.
    pub fn mint(&self) -> Result<IdentityCertificate, IdentityError> {
        let keypair = Keypair::generate();
        let pseudonym = AnonymousParty::new(keypair.public_key());
        let certificate = issue_certificate(&self.party, &self.keypair, pseudonym)?;

        self.owned
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pseudonym.owning_key, Arc::new(keypair));
        self.certificates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pseudonym.owning_key, certificate.clone());

        debug!(party = %self.party, pseudonym = %pseudonym, "minted pseudonym");
        Ok(certificate)
    }

    pub fn learn(&self, certificate: IdentityCertificate) -> Result<(), IdentityError> {
        verify_certificate(&certificate)?;
        debug!(
            party = %self.party,
            pseudonym = %certificate.pseudonym,
            "learned identity certificate"
        );
        self.certificates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(certificate.pseudonym.owning_key, certificate);
        Ok(())
    }

    pub fn resolve(&self, pseudonym: &AnonymousParty) -> Option<Party> {
        self.certificate(pseudonym).map(|c| c.party)
    }

    pub fn certificate(&self, pseudonym: &AnonymousParty) -> Option<IdentityCertificate> {
        self.certificates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pseudonym.owning_key)
            .cloned()
    }

    pub fn owns(&self, key: &PublicKey) -> bool {
        self.owned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn signing_key_for(
        &self,
        pseudonym: &AnonymousParty,
    ) -> Result<Arc<Keypair>, IdentityError> {
        self.owned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pseudonym.owning_key)
            .cloned()
            .ok_or(IdentityError::NotOwned(*pseudonym))
    }
}

/// [`IdentityFacade`] backed by a local wallet and a way to reach others.
pub struct IdentityService {
    wallet: Arc<IdentityWallet>,
    exchange: Arc<dyn IdentityExchange>,
}

impl IdentityService {
    pub fn new(wallet: Arc<IdentityWallet>, exchange: Arc<dyn IdentityExchange>) -> Self {
        Self { wallet, exchange }
    }
}

#[async_trait]
impl IdentityFacade for IdentityService {
    fn me(&self) -> &Party {
        self.wallet.party()
    }

    async fn mint(&self, owner: &Party) -> Result<AnonymousParty, IdentityError> {
        if owner == self.wallet.party() {
            return Ok(self.wallet.mint()?.pseudonym);
        }
        let certificate = self.exchange.mint_remote(owner, None).await?;
        if &certificate.party != owner {
            return Err(IdentityError::Exchange {
                reason: format!("{owner} answered with a certificate for {}", certificate.party),
            });
        }
        let pseudonym = certificate.pseudonym;
        self.wallet.learn(certificate)?;
        Ok(pseudonym)
    }

    async fn swap(
        &self,
        counterparty: &Party,
    ) -> Result<(AnonymousParty, AnonymousParty), IdentityError> {
        let ours = self.wallet.mint()?;
        let ours_pseudonym = ours.pseudonym;
        let theirs = self.exchange.mint_remote(counterparty, Some(ours)).await?;
        if &theirs.party != counterparty {
            return Err(IdentityError::Exchange {
                reason: format!(
                    "{counterparty} answered with a certificate for {}",
                    theirs.party
                ),
            });
        }
        let theirs_pseudonym = theirs.pseudonym;
        self.wallet.learn(theirs)?;
        Ok((ours_pseudonym, theirs_pseudonym))
    }

    fn resolve(&self, pseudonym: &AnonymousParty) -> Option<Party> {
        self.wallet.resolve(pseudonym)
    }

    fn certificate(&self, pseudonym: &AnonymousParty) -> Option<IdentityCertificate> {
        self.wallet.certificate(pseudonym)
    }

    fn learn(&self, certificate: IdentityCertificate) -> Result<(), IdentityError> {
        self.wallet.learn(certificate)
    }

    fn owns(&self, key: &PublicKey) -> bool {
        self.wallet.owns(key)
    }

    fn signing_key_for(&self, pseudonym: &AnonymousParty) -> Result<Arc<Keypair>, IdentityError> {
        self.wallet.signing_key_for(pseudonym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exchange that talks to a single fixed wallet.
    struct Direct(Arc<IdentityWallet>);

    #[async_trait]
    impl IdentityExchange for Direct {
        async fn mint_remote(
            &self,
            owner: &Party,
            disclose: Option<IdentityCertificate>,
        ) -> Result<IdentityCertificate, IdentityError> {
            if owner != self.0.party() {
                return Err(IdentityError::UnknownParty(owner.name.clone()));
            }
            if let Some(cert) = disclose {
                self.0.learn(cert)?;
            }
            self.0.mint()
        }
    }

    fn wallet(name: &str) -> Arc<IdentityWallet> {
        Arc::new(IdentityWallet::new(name, Keypair::generate()))
    }

    #[test]
    fn test_minted_pseudonym_resolves_locally_only() {
        let alice = wallet("Alice");
        let bob = wallet("Bob");
        let cert = alice.mint().unwrap();
        assert_eq!(alice.resolve(&cert.pseudonym), Some(alice.party().clone()));
        assert!(alice.owns(&cert.pseudonym.owning_key));
        assert_eq!(bob.resolve(&cert.pseudonym), None);
        assert!(bob.signing_key_for(&cert.pseudonym).is_err());
    }

    #[test]
    fn test_learn_rejects_forged_certificate() {
        let alice = wallet("Alice");
        let bob = wallet("Bob");
        let mut cert = alice.mint().unwrap();
        cert.party = bob.party().clone();
        assert!(matches!(
            bob.learn(cert),
            Err(IdentityError::Certificate(_))
        ));
    }

    #[tokio::test]
    async fn test_swap_discloses_both_ways() {
        let alice = wallet("Alice");
        let bob = wallet("Bob");
        let service = IdentityService::new(alice.clone(), Arc::new(Direct(bob.clone())));

        let (ours, theirs) = service.swap(bob.party()).await.unwrap();
        assert_eq!(service.resolve(&theirs), Some(bob.party().clone()));
        assert_eq!(bob.resolve(&ours), Some(alice.party().clone()));
        assert!(service.owns(&ours.owning_key));
        assert!(bob.owns(&theirs.owning_key));
    }

    #[tokio::test]
    async fn test_remote_mint_is_one_way() {
        let alice = wallet("Alice");
        let bob = wallet("Bob");
        let service = IdentityService::new(alice.clone(), Arc::new(Direct(bob.clone())));

        let minted = service.mint(bob.party()).await.unwrap();
        assert_eq!(service.resolve(&minted), Some(bob.party().clone()));
        assert!(!service.owns(&minted.owning_key));
        assert!(service.signing_key_for(&minted).is_err());
    }

    #[tokio::test]
    async fn test_mint_for_self_stays_local() {
        let alice = wallet("Alice");
        let bob = wallet("Bob");
        let service = IdentityService::new(alice.clone(), Arc::new(Direct(bob.clone())));
        let minted = service.mint(alice.party()).await.unwrap();
        assert!(service.owns(&minted.owning_key));
        assert_eq!(bob.resolve(&minted), None);
    }
}
