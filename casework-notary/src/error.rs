use thiserror::Error;

use casework_types::case::RecordRef;
use casework_types::primitives::{short_hex, TransitionId};

/// Why the notary refused a transition.
#[derive(Debug, Error)]
pub enum NotaryError {
    /// An input was already consumed by another transition.
    #[error("input {reference} already consumed by transition {}", short_hex(.consumed_by))]
    Conflict {
        reference: RecordRef,
        consumed_by: TransitionId,
    },

    /// The transition is not acceptable as submitted.
    #[error("rejected by notary: {reason}")]
    Rejected { reason: String },

    #[error("notary storage error: {0}")]
    Storage(#[from] casework_storage::error::StorageError),
}
