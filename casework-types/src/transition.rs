use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::case::{CaseRecord, LedgerState, StateAndRef};
use crate::identity::Party;
use crate::primitives::*;

/// The kind of transition being proposed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum Intent {
    /// Open a new case. Consumes nothing.
    Open,
    /// Hand an open case over to a new investigator.
    Transfer,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Open => f.write_str("open"),
            Intent::Transfer => f.write_str("transfer"),
        }
    }
}

/// A candidate transition, as built by the assembler and checked by every signer.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TransitionProposal {
    pub intent: Intent,
    /// Inputs consumed, each with the reference it was produced under.
    pub consumed: Vec<StateAndRef>,
    /// Outputs produced.
    pub produced: Vec<LedgerState>,
    /// Keys whose signatures are required before the notary will accept.
    pub required_signers: Vec<PublicKey>,
    /// The notary that orders this transition.
    pub notary: Party,
}

impl TransitionProposal {
    /// Case records among the consumed inputs.
    pub fn consumed_cases(&self) -> impl Iterator<Item = &CaseRecord> {
        self.consumed.iter().filter_map(|input| input.state.as_case())
    }

    /// Case records among the produced outputs.
    pub fn produced_cases(&self) -> impl Iterator<Item = &CaseRecord> {
        self.produced.iter().filter_map(LedgerState::as_case)
    }

    pub fn requires_signer(&self, key: &PublicKey) -> bool {
        self.required_signers.contains(key)
    }
}

/// A signature over a transition ID, tagged with the signing key.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TransitionSignature {
    pub by: PublicKey,
    #[serde(with = "crate::primitives::serde_sig")]
    pub signature: Signature,
}

/// A proposal plus the signatures collected over its ID so far.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SignedTransition {
    /// BLAKE3 over the proposal (see `casework_contract::builder::compute_transition_id`).
    pub id: TransitionId,
    pub proposal: TransitionProposal,
    pub signatures: Vec<TransitionSignature>,
}

impl SignedTransition {
    /// Keys that have signed so far.
    pub fn signed_by(&self) -> impl Iterator<Item = &PublicKey> {
        self.signatures.iter().map(|s| &s.by)
    }

    /// Required signers that have not signed yet.
    pub fn missing_signers(&self) -> Vec<PublicKey> {
        self.proposal
            .required_signers
            .iter()
            .filter(|key| !self.signatures.iter().any(|s| &s.by == *key))
            .copied()
            .collect()
    }
}

/// A transition accepted by the notary. This is the committed form that
/// vaults record.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct NotarisedTransition {
    pub transition: SignedTransition,
    #[serde(with = "crate::primitives::serde_sig")]
    pub notary_signature: Signature,
}

impl NotarisedTransition {
    pub fn id(&self) -> &TransitionId {
        &self.transition.id
    }

    pub fn proposal(&self) -> &TransitionProposal {
        &self.transition.proposal
    }
}
