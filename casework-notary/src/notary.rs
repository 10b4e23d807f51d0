use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use casework_contract::validation::{validate_transition, verify_signatures};
use casework_crypto::hash::blake3_hash_domain;
use casework_crypto::keys::Keypair;
use casework_storage::traits::{BatchOp, BatchWriter};
use casework_types::case::{LedgerState, RecordRef};
use casework_types::constants::OUTPUT_DIGEST_DOMAIN;
use casework_types::identity::Party;
use casework_types::primitives::{short_hex, Hash, TransitionId};
use casework_types::transition::{NotarisedTransition, SignedTransition};

use crate::error::NotaryError;

const SPENT_PREFIX: &[u8] = b"notary:spent:";
const ISSUED_PREFIX: &[u8] = b"notary:issued:";

/// The finality collaborator seen by the signing coordinator.
#[async_trait]
pub trait Notary: Send + Sync {
    /// The notary's well-known identity. Proposals must name it.
    fn identity(&self) -> &Party;

    /// Submit a fully signed transition for ordering. Acceptance is the point
    /// of commit; a [`NotaryError::Conflict`] means another transition won.
    async fn submit(&self, tx: SignedTransition) -> Result<NotarisedTransition, NotaryError>;
}

/// Digest of an output as recorded at issuance; inputs must match it.
pub fn output_digest(state: &LedgerState) -> Result<Hash, NotaryError> {
    let bytes = borsh::to_vec(state).map_err(|e| NotaryError::Rejected {
        reason: format!("cannot encode state: {e}"),
    })?;
    Ok(blake3_hash_domain(OUTPUT_DIGEST_DOMAIN, &bytes))
}

/// A single-node uniqueness notary over a key-value store.
///
/// Tracks every output it has issued and every input it has seen consumed.
/// Submissions are serialized, so of two transitions racing for the same
/// input exactly one is accepted.
pub struct UniquenessNotary<S: BatchWriter> {
    party: Party,
    keypair: Keypair,
    store: S,
    /// Re-run the case contract on submission, not just signature checks.
    validating: bool,
    commit_lock: Mutex<()>,
}

impl<S: BatchWriter> UniquenessNotary<S> {
    pub fn new(name: impl Into<String>, keypair: Keypair, store: S, validating: bool) -> Self {
        let party = Party::new(name, keypair.public_key());
        Self {
            party,
            keypair,
            store,
            validating,
            commit_lock: Mutex::new(()),
        }
    }

    fn key(prefix: &[u8], reference: &RecordRef) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 36);
        key.extend_from_slice(prefix);
        key.extend_from_slice(&reference.transition_id);
        key.extend_from_slice(&reference.index.to_be_bytes());
        key
    }

    fn check_addressing_and_rules(&self, tx: &SignedTransition) -> Result<(), NotaryError> {
        if tx.proposal.notary != self.party {
            return Err(NotaryError::Rejected {
                reason: format!("transition is addressed to notary {}", tx.proposal.notary),
            });
        }
        verify_signatures(tx).map_err(|e| NotaryError::Rejected {
            reason: e.to_string(),
        })?;
        if self.validating {
            validate_transition(&tx.proposal).map_err(|e| NotaryError::Rejected {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Returns `Some(id)` when every input is already spent by `tx` itself,
    /// i.e. the transition is being resubmitted after it committed.
    fn check_inputs(&self, tx: &SignedTransition) -> Result<Option<TransitionId>, NotaryError> {
        let mut already_committed = !tx.proposal.consumed.is_empty();

        for input in &tx.proposal.consumed {
            let reference = input.reference;
            if let Some(spender) = self.store.get(&Self::key(SPENT_PREFIX, &reference))? {
                let consumed_by: TransitionId =
                    spender.try_into().map_err(|_| NotaryError::Rejected {
                        reason: "corrupt spent-input record".to_string(),
                    })?;
                if consumed_by != tx.id {
                    return Err(NotaryError::Conflict {
                        reference,
                        consumed_by,
                    });
                }
                continue;
            }
            already_committed = false;

            let issued = self
                .store
                .get(&Self::key(ISSUED_PREFIX, &reference))?
                .ok_or_else(|| NotaryError::Rejected {
                    reason: format!("input {reference} was never issued by this notary"),
                })?;
            if issued != output_digest(&input.state)? {
                return Err(NotaryError::Rejected {
                    reason: format!("input {reference} does not match the issued output"),
                });
            }
        }

        Ok(already_committed.then_some(tx.id))
    }
}

#[async_trait]
impl<S: BatchWriter> Notary for UniquenessNotary<S> {
    fn identity(&self) -> &Party {
        &self.party
    }

    async fn submit(&self, tx: SignedTransition) -> Result<NotarisedTransition, NotaryError> {
        let tx_hex = short_hex(&tx.id);
        if let Err(e) = self.check_addressing_and_rules(&tx) {
            warn!(tx = %tx_hex, error = %e, "notary rejected transition");
            return Err(e);
        }

        let _commit = self.commit_lock.lock().await;

        match self.check_inputs(&tx) {
            Ok(Some(_)) => {
                debug!(tx = %tx_hex, "transition resubmitted after commit");
            }
            Ok(None) => {
                let mut ops = Vec::new();
                for input in &tx.proposal.consumed {
                    ops.push(BatchOp::Put {
                        key: Self::key(SPENT_PREFIX, &input.reference),
                        value: tx.id.to_vec(),
                    });
                }
                for (index, output) in tx.proposal.produced.iter().enumerate() {
                    let reference = RecordRef {
                        transition_id: tx.id,
                        index: index as u32,
                    };
                    ops.push(BatchOp::Put {
                        key: Self::key(ISSUED_PREFIX, &reference),
                        value: output_digest(output)?.to_vec(),
                    });
                }
                self.store.write_batch(ops)?;
                info!(
                    tx = %tx_hex,
                    intent = %tx.proposal.intent,
                    inputs = tx.proposal.consumed.len(),
                    "notarised transition"
                );
            }
            Err(e) => {
                warn!(tx = %tx_hex, error = %e, "notary refused transition");
                return Err(e);
            }
        }

        let notary_signature = self.keypair.sign(&tx.id);
        Ok(NotarisedTransition {
            transition: tx,
            notary_signature,
        })
    }
}

/// Check that `tx` carries a valid signature by `notary`.
pub fn verify_notarisation(
    tx: &NotarisedTransition,
    notary: &Party,
) -> Result<(), casework_types::error::CaseworkError> {
    casework_crypto::keys::verify(tx.id(), &tx.notary_signature, &notary.owning_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casework_contract::builder::{add_signature, sign_transition, TransitionBuilder};
    use casework_storage::memory::MemoryStore;
    use casework_types::case::{CaseRecord, StateAndRef};
    use casework_types::identity::AnonymousParty;

    struct Fixture {
        notary: UniquenessNotary<MemoryStore>,
        reporter: Keypair,
        investigator: Keypair,
    }

    fn fixture(validating: bool) -> Fixture {
        Fixture {
            notary: UniquenessNotary::new(
                "Notary",
                Keypair::generate(),
                MemoryStore::new(),
                validating,
            ),
            reporter: Keypair::generate(),
            investigator: Keypair::generate(),
        }
    }

    fn signed(mut tx: SignedTransition, signers: &[&Keypair]) -> SignedTransition {
        for kp in signers {
            let sig = sign_transition(&tx, kp);
            add_signature(&mut tx, sig);
        }
        tx
    }

    fn open(f: &Fixture) -> SignedTransition {
        let record = CaseRecord::open(
            "Enron",
            AnonymousParty::new(f.reporter.public_key()),
            AnonymousParty::new(f.investigator.public_key()),
        );
        let tx = TransitionBuilder::open(f.notary.identity().clone())
            .add_output(LedgerState::Case(record))
            .add_signer(f.reporter.public_key())
            .add_signer(f.investigator.public_key())
            .build()
            .unwrap();
        signed(tx, &[&f.reporter, &f.investigator])
    }

    fn transfer(f: &Fixture, from: &NotarisedTransition, to: &Keypair) -> SignedTransition {
        let old = from.proposal().produced[0].as_case().unwrap().clone();
        let new = old.with_investigator(AnonymousParty::new(to.public_key()));
        let tx = TransitionBuilder::transfer(f.notary.identity().clone())
            .add_input(StateAndRef {
                state: LedgerState::Case(old),
                reference: RecordRef {
                    transition_id: *from.id(),
                    index: 0,
                },
            })
            .add_output(LedgerState::Case(new))
            .add_signer(f.investigator.public_key())
            .add_signer(to.public_key())
            .build()
            .unwrap();
        signed(tx, &[&f.investigator, to])
    }

    #[tokio::test]
    async fn test_open_is_notarised() {
        let f = fixture(true);
        let tx = f.notary.submit(open(&f)).await.unwrap();
        assert!(verify_notarisation(&tx, f.notary.identity()).is_ok());
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let f = fixture(true);
        let mut tx = open(&f);
        tx.signatures.pop();
        let err = f.notary.submit(tx).await.unwrap_err();
        assert!(matches!(err, NotaryError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_wrong_notary_rejected() {
        let f = fixture(true);
        let other = fixture(true);
        let err = other.notary.submit(open(&f)).await.unwrap_err();
        assert!(err.to_string().contains("addressed to notary"));
    }

    #[tokio::test]
    async fn test_double_spend_is_conflict() {
        let f = fixture(true);
        let opened = f.notary.submit(open(&f)).await.unwrap();

        let c = Keypair::generate();
        let d = Keypair::generate();
        let first = transfer(&f, &opened, &c);
        let second = transfer(&f, &opened, &d);

        let accepted = f.notary.submit(first).await.unwrap();
        match f.notary.submit(second).await.unwrap_err() {
            NotaryError::Conflict { consumed_by, .. } => assert_eq!(consumed_by, *accepted.id()),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let f = fixture(true);
        let opened = f.notary.submit(open(&f)).await.unwrap();
        let c = Keypair::generate();
        let tx = transfer(&f, &opened, &c);
        let first = f.notary.submit(tx.clone()).await.unwrap();
        let again = f.notary.submit(tx).await.unwrap();
        assert_eq!(first.id(), again.id());
    }

    #[tokio::test]
    async fn test_unknown_input_rejected() {
        let f = fixture(true);
        let foreign = fixture(true);
        let opened_elsewhere = foreign.notary.submit(open(&foreign)).await.unwrap();

        // Same case history, but addressed to a notary that never saw it.
        let c = Keypair::generate();
        let mut proposal = transfer(&foreign, &opened_elsewhere, &c).proposal;
        proposal.notary = f.notary.identity().clone();
        let tx = signed(
            casework_contract::builder::unsigned(proposal).unwrap(),
            &[&foreign.investigator, &c],
        );
        let err = f.notary.submit(tx).await.unwrap_err();
        assert!(err.to_string().contains("never issued"));
    }

    #[tokio::test]
    async fn test_tampered_input_rejected() {
        let f = fixture(false);
        let opened = f.notary.submit(open(&f)).await.unwrap();
        let c = Keypair::generate();
        let tx = transfer(&f, &opened, &c);

        let mut proposal = tx.proposal.clone();
        if let LedgerState::Case(r) = &mut proposal.consumed[0].state {
            r.subject = "Worldcom".to_string();
        }
        let tampered = signed(
            casework_contract::builder::unsigned(proposal).unwrap(),
            &[&f.investigator, &c],
        );
        let err = f.notary.submit(tampered).await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn test_validating_notary_runs_contract() {
        let f = fixture(true);
        let record = CaseRecord::open(
            "Enron",
            AnonymousParty::new(f.reporter.public_key()),
            AnonymousParty::new(f.investigator.public_key()),
        );
        let tx = TransitionBuilder::open(f.notary.identity().clone())
            .add_output(LedgerState::Case(record))
            .add_output(LedgerState::Foreign {
                contract: "dummy".to_string(),
                data: vec![],
            })
            .add_signer(f.reporter.public_key())
            .add_signer(f.investigator.public_key())
            .build()
            .unwrap();
        let err = f
            .notary
            .submit(signed(tx, &[&f.reporter, &f.investigator]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no other outputs"));
    }
}
