use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::identity::{IdentityCertificate, Party};
use crate::transition::{Intent, NotarisedTransition, SignedTransition, TransitionSignature};

/// Why a session was opened.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum SessionPurpose {
    /// Collect a counterparty signature for a transition of the given intent.
    Sign(Intent),
    /// Hand a finalized transition to a participant that did not sign it.
    Record,
}

/// Messages exchanged over a protocol session.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum SessionMessage {
    /// First frame on every session.
    Init {
        purpose: SessionPurpose,
        initiator: Party,
    },
    /// Certificates the counterparty needs to resolve the proposal's pseudonyms.
    IdentitySync(Vec<IdentityCertificate>),
    /// A proposal carrying the initiator's signature.
    Proposal(Box<SignedTransition>),
    /// A counterparty's signature over the proposal.
    Signature(TransitionSignature),
    /// An explicit refusal to sign.
    Rejected { reason: String },
    /// The committed transition.
    Finalized(Box<NotarisedTransition>),
}

impl SessionMessage {
    /// Short name of the variant for log lines and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Init { .. } => "init",
            SessionMessage::IdentitySync(_) => "identity-sync",
            SessionMessage::Proposal(_) => "proposal",
            SessionMessage::Signature(_) => "signature",
            SessionMessage::Rejected { .. } => "rejected",
            SessionMessage::Finalized(_) => "finalized",
        }
    }
}
