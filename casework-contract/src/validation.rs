use casework_crypto::keys::verify_all;
use casework_types::case::{CaseRecord, LedgerState};
use casework_types::primitives::short_hex;
use casework_types::transition::*;
use tracing::trace;

use crate::builder::compute_transition_id;
use crate::error::ContractViolation;

/// Validate a proposal against the case contract.
///
/// `Ok(())` accepts. Rules run in a fixed order, structural rules before
/// signer rules, and the first violation is returned so that every party
/// derives the same reason for the same proposal.
pub fn validate_transition(proposal: &TransitionProposal) -> Result<(), ContractViolation> {
    let verdict = match proposal.intent {
        Intent::Open => validate_open(proposal),
        Intent::Transfer => validate_transfer(proposal),
    };
    trace!(intent = %proposal.intent, ok = verdict.is_ok(), "validated proposal");
    verdict
}

/// Rules for opening a case.
pub fn validate_open(proposal: &TransitionProposal) -> Result<(), ContractViolation> {
    if !proposal.consumed.is_empty() {
        return Err(ContractViolation::OpenHasInputs);
    }
    let output = single_case(&proposal.produced).ok_or(ContractViolation::OpenMissingCaseOutput)?;
    if proposal.produced.len() != 1 {
        return Err(ContractViolation::OpenHasOtherOutputs);
    }

    let signed_by_participants = output
        .participants()
        .iter()
        .all(|p| proposal.requires_signer(&p.owning_key));
    if !signed_by_participants {
        return Err(ContractViolation::OpenMissingSigners);
    }
    Ok(())
}

/// Rules for handing a case to a new investigator.
pub fn validate_transfer(proposal: &TransitionProposal) -> Result<(), ContractViolation> {
    let inputs: Vec<&LedgerState> = proposal.consumed.iter().map(|i| &i.state).collect();
    let input = single_case(inputs.iter().copied())
        .ok_or(ContractViolation::TransferMissingCaseInput)?;
    if proposal.consumed.len() != 1 {
        return Err(ContractViolation::TransferHasOtherInputs);
    }
    let output =
        single_case(&proposal.produced).ok_or(ContractViolation::TransferMissingCaseOutput)?;
    if proposal.produced.len() != 1 {
        return Err(ContractViolation::TransferHasOtherOutputs);
    }

    if input.with_investigator(output.investigator) != *output {
        return Err(ContractViolation::TransferChangesOtherFields);
    }
    if input.investigator == output.investigator {
        return Err(ContractViolation::TransferKeepsInvestigator);
    }

    let old = &input.investigator.owning_key;
    let new = &output.investigator.owning_key;
    if !(proposal.requires_signer(old) && proposal.requires_signer(new)) {
        return Err(ContractViolation::TransferMissingSigners);
    }
    Ok(())
}

/// The only case record among `states`, if there is exactly one.
fn single_case<'a>(states: impl IntoIterator<Item = &'a LedgerState>) -> Option<&'a CaseRecord> {
    let mut cases = states.into_iter().filter_map(LedgerState::as_case);
    match (cases.next(), cases.next()) {
        (Some(record), None) => Some(record),
        _ => None,
    }
}

/// Check the ID and every signature present, without requiring that all
/// required signers have signed yet.
pub fn verify_partial_signatures(tx: &SignedTransition) -> Result<(), ContractViolation> {
    if compute_transition_id(&tx.proposal)? != tx.id {
        return Err(ContractViolation::TransitionIdMismatch);
    }
    if let Some(stray) = tx
        .signatures
        .iter()
        .find(|s| !tx.proposal.requires_signer(&s.by))
    {
        return Err(ContractViolation::UnexpectedSigner {
            signer: short_hex(&stray.by),
        });
    }

    let pairs: Vec<_> = tx.signatures.iter().map(|s| (s.by, s.signature)).collect();
    verify_all(&tx.id, &pairs).map_err(|e| ContractViolation::InvalidSignature {
        signer: match e {
            casework_types::error::CaseworkError::InvalidSignature { signer } => signer,
            other => other.to_string(),
        },
    })
}

/// Check the ID, every signature, and that every required signer has signed.
pub fn verify_signatures(tx: &SignedTransition) -> Result<(), ContractViolation> {
    verify_partial_signatures(tx)?;
    let missing = tx.missing_signers();
    if !missing.is_empty() {
        return Err(ContractViolation::MissingSignatures {
            missing: missing.len(),
        });
    }
    Ok(())
}
