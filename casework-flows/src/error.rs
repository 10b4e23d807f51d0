use thiserror::Error;

use casework_contract::error::ContractViolation;
use casework_notary::error::NotaryError;
use casework_storage::error::StorageError;
use casework_types::error::CaseworkError;
use casework_types::primitives::CaseId;

use crate::identity::IdentityError;

/// Why a protocol run failed.
///
/// No variant allows resuming a run; recovery is always a fresh run.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The proposal breaks a contract rule. Never retried.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The caller is not entitled to act on this case.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("no live record for case {case_id}")]
    NotFound { case_id: CaseId },

    /// More than one live record shares a case ID. The ledger is corrupt.
    #[error("{live} live records for case {case_id}")]
    AmbiguousState { case_id: CaseId, live: usize },

    #[error("{party} rejected the proposal: {reason}")]
    CounterpartyRejected { party: String, reason: String },

    /// The notary saw a competing transition. Re-derive against fresh state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("finality rejected the transition: {reason}")]
    FinalityRejected { reason: String },

    /// Session-level failure. Safe to retry the whole run.
    #[error("transport failure: {reason}")]
    TransportFailure { reason: String },

    #[error("protocol run cancelled")]
    Cancelled,

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl FlowError {
    pub fn transport(reason: impl Into<String>) -> Self {
        FlowError::TransportFailure {
            reason: reason.into(),
        }
    }
}

impl From<ContractViolation> for FlowError {
    fn from(v: ContractViolation) -> Self {
        FlowError::ValidationFailed(v.to_string())
    }
}

impl From<NotaryError> for FlowError {
    fn from(e: NotaryError) -> Self {
        match e {
            NotaryError::Conflict { .. } => FlowError::Conflict(e.to_string()),
            NotaryError::Rejected { reason } => FlowError::FinalityRejected { reason },
            NotaryError::Storage(e) => FlowError::FinalityRejected {
                reason: e.to_string(),
            },
        }
    }
}

/// Frame-level errors surface as transport failures.
impl From<CaseworkError> for FlowError {
    fn from(e: CaseworkError) -> Self {
        FlowError::TransportFailure {
            reason: e.to_string(),
        }
    }
}
