use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::identity::AnonymousParty;
use crate::primitives::*;

/// One version of a case.
///
/// Records are never mutated: a transfer consumes the live version and
/// produces a new one with the same `case_id`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Free-text name of the entity the case concerns.
    pub subject: String,
    /// Pseudonym of the party who opened the case.
    pub reporter: AnonymousParty,
    /// Pseudonym of the party currently handling the case.
    pub investigator: AnonymousParty,
    /// Stable identifier shared by every version of the case.
    pub case_id: CaseId,
}

impl CaseRecord {
    /// Create the first version of a case under a fresh case ID.
    pub fn open(
        subject: impl Into<String>,
        reporter: AnonymousParty,
        investigator: AnonymousParty,
    ) -> Self {
        Self {
            subject: subject.into(),
            reporter,
            investigator,
            case_id: CaseId::random(),
        }
    }

    /// The identities that must be able to see and validate this record.
    pub fn participants(&self) -> [AnonymousParty; 2] {
        [self.reporter, self.investigator]
    }

    /// Copy of this record with the investigator replaced.
    pub fn with_investigator(&self, investigator: AnonymousParty) -> Self {
        Self {
            investigator,
            ..self.clone()
        }
    }
}

/// Anything a transition may consume or produce.
///
/// Only `Case` states belong to this ledger; `Foreign` stands for a state
/// governed by some other contract and exists so that validation can reject
/// transitions that smuggle extra inputs or outputs.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum LedgerState {
    Case(CaseRecord),
    Foreign { contract: String, data: Vec<u8> },
}

impl LedgerState {
    pub fn as_case(&self) -> Option<&CaseRecord> {
        match self {
            LedgerState::Case(record) => Some(record),
            LedgerState::Foreign { .. } => None,
        }
    }
}

/// Points at one output of a finalized transition.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct RecordRef {
    pub transition_id: TransitionId,
    pub index: u32,
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", short_hex(&self.transition_id), self.index)
    }
}

/// A state together with the reference it was produced under.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: LedgerState,
    pub reference: RecordRef,
}
