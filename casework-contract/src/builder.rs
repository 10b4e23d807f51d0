use borsh::BorshSerialize;
use casework_crypto::keys::Keypair;
use casework_types::case::{LedgerState, StateAndRef};
use casework_types::constants::TRANSITION_ID_DOMAIN;
use casework_types::identity::Party;
use casework_types::primitives::*;
use casework_types::transition::*;

use crate::error::ContractViolation;

/// Builder for constructing transition proposals step by step.
pub struct TransitionBuilder {
    intent: Intent,
    notary: Party,
    consumed: Vec<StateAndRef>,
    produced: Vec<LedgerState>,
    required_signers: Vec<PublicKey>,
}

impl TransitionBuilder {
    /// Start building an open transition.
    pub fn open(notary: Party) -> Self {
        Self::new(Intent::Open, notary)
    }

    /// Start building a transfer transition.
    pub fn transfer(notary: Party) -> Self {
        Self::new(Intent::Transfer, notary)
    }

    fn new(intent: Intent, notary: Party) -> Self {
        Self {
            intent,
            notary,
            consumed: Vec::new(),
            produced: Vec::new(),
            required_signers: Vec::new(),
        }
    }

    /// Consume an input.
    pub fn add_input(mut self, input: StateAndRef) -> Self {
        self.consumed.push(input);
        self
    }

    /// Produce an output.
    pub fn add_output(mut self, output: LedgerState) -> Self {
        self.produced.push(output);
        self
    }

    /// Require a signature from `key`. Duplicate keys are ignored.
    pub fn add_signer(mut self, key: PublicKey) -> Self {
        if !self.required_signers.contains(&key) {
            self.required_signers.push(key);
        }
        self
    }

    /// The proposal as built so far.
    pub fn proposal(self) -> TransitionProposal {
        TransitionProposal {
            intent: self.intent,
            consumed: self.consumed,
            produced: self.produced,
            required_signers: self.required_signers,
            notary: self.notary,
        }
    }

    /// Build the transition (without signatures). The ID is computed from the proposal.
    pub fn build(self) -> Result<SignedTransition, ContractViolation> {
        unsigned(self.proposal())
    }
}

/// Wrap a proposal as a transition with no signatures yet.
pub fn unsigned(proposal: TransitionProposal) -> Result<SignedTransition, ContractViolation> {
    let id = compute_transition_id(&proposal)?;
    Ok(SignedTransition {
        id,
        proposal,
        signatures: Vec::new(),
    })
}

/// Compute the transition ID: domain-separated BLAKE3 over the borsh
/// encoding of the proposal. Signatures are not part of the ID.
pub fn compute_transition_id(
    proposal: &TransitionProposal,
) -> Result<TransitionId, ContractViolation> {
    let mut hasher = blake3::Hasher::new_derive_key(TRANSITION_ID_DOMAIN);
    proposal
        .serialize(&mut hasher)
        .map_err(|e| ContractViolation::Encoding {
            reason: e.to_string(),
        })?;
    Ok(*hasher.finalize().as_bytes())
}

/// Sign a transition with a keypair. The signature covers the transition ID.
pub fn sign_transition(tx: &SignedTransition, keypair: &Keypair) -> TransitionSignature {
    TransitionSignature {
        by: keypair.public_key(),
        signature: keypair.sign(&tx.id),
    }
}

/// Add a signature to a transition, replacing any earlier one by the same key.
pub fn add_signature(tx: &mut SignedTransition, signature: TransitionSignature) {
    tx.signatures.retain(|s| s.by != signature.by);
    tx.signatures.push(signature);
}
