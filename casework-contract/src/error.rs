use thiserror::Error;

/// Why a transition is rejected by the case contract.
///
/// The `Display` text is the human-readable reason surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    // ─── Open Rules ──────────────────────────────────────────────────────────
    #[error("An open transaction should have zero inputs.")]
    OpenHasInputs,

    #[error("An open transaction should have a case output.")]
    OpenMissingCaseOutput,

    #[error("An open transaction should have no other outputs.")]
    OpenHasOtherOutputs,

    #[error("An open transaction should be signed by the reporter and the investigator.")]
    OpenMissingSigners,

    // ─── Transfer Rules ──────────────────────────────────────────────────────
    #[error("A transfer transaction should have a case input.")]
    TransferMissingCaseInput,

    #[error("A transfer transaction should have no other inputs.")]
    TransferHasOtherInputs,

    #[error("A transfer transaction should have a case output.")]
    TransferMissingCaseOutput,

    #[error("A transfer transaction should have no other outputs.")]
    TransferHasOtherOutputs,

    #[error("A transfer transaction should only update the investigator field.")]
    TransferChangesOtherFields,

    #[error("A transfer transaction should change the investigator.")]
    TransferKeepsInvestigator,

    #[error(
        "A transfer transaction should be signed by the old investigator and the new investigator."
    )]
    TransferMissingSigners,

    // ─── Signature Checks ────────────────────────────────────────────────────
    #[error("transition id does not match its contents")]
    TransitionIdMismatch,

    #[error("signature by {signer} is not from a required signer")]
    UnexpectedSigner { signer: String },

    #[error("invalid signature by {signer}")]
    InvalidSignature { signer: String },

    #[error("missing signatures from {missing} required signer(s)")]
    MissingSignatures { missing: usize },

    #[error("transition encoding failed: {reason}")]
    Encoding { reason: String },
}
