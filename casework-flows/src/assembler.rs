use std::sync::Arc;

use tracing::{debug, error};

use casework_contract::builder::TransitionBuilder;
use casework_storage::vault_store::Vault;
use casework_types::case::{CaseRecord, LedgerState, StateAndRef};
use casework_types::identity::Party;
use casework_types::primitives::CaseId;
use casework_types::transition::SignedTransition;

use crate::error::FlowError;
use crate::identity::IdentityFacade;

/// Builds proposals from caller intent and the node's view of the ledger.
///
/// The notary is fixed at construction; every proposal names it.
pub struct TransactionAssembler {
    identity: Arc<dyn IdentityFacade>,
    vault: Arc<dyn Vault>,
    notary: Party,
}

impl TransactionAssembler {
    pub fn new(identity: Arc<dyn IdentityFacade>, vault: Arc<dyn Vault>, notary: Party) -> Self {
        Self {
            identity,
            vault,
            notary,
        }
    }

    /// Open a case about `subject` with this node as reporter.
    ///
    /// Swaps fresh pseudonyms with `investigator`, so both sides can resolve
    /// each other and nobody else can.
    pub async fn assemble_open(
        &self,
        subject: &str,
        investigator: &Party,
    ) -> Result<SignedTransition, FlowError> {
        let me = self.identity.me();
        if investigator == me {
            return Err(FlowError::ValidationFailed(
                "reporter and investigator must be different parties".to_string(),
            ));
        }

        let (reporter, investigator_id) = self.identity.swap(investigator).await?;
        let record = CaseRecord::open(subject, reporter, investigator_id);
        debug!(case = %record.case_id, investigator = %investigator, "assembling open");

        let tx = TransitionBuilder::open(self.notary.clone())
            .add_output(LedgerState::Case(record))
            .add_signer(reporter.owning_key)
            .add_signer(investigator_id.owning_key)
            .build()?;
        Ok(tx)
    }

    /// Hand the live version of `case_id` to `new_investigator`.
    ///
    /// Only the current investigator may do this. It keeps its own
    /// pseudonym on the consumed record; the new investigator gets a fresh one.
    pub async fn assemble_transfer(
        &self,
        case_id: &CaseId,
        new_investigator: &Party,
    ) -> Result<SignedTransition, FlowError> {
        let input = self.live_version(case_id)?;
        let current = match input.state.as_case() {
            Some(record) => record.clone(),
            None => {
                error!(case = %case_id, "vault returned a non-case state for a case lookup");
                return Err(FlowError::AmbiguousState {
                    case_id: *case_id,
                    live: 1,
                });
            }
        };

        let me = self.identity.me();
        match self.identity.resolve(&current.investigator) {
            Some(holder) if &holder == me => {}
            Some(holder) => {
                return Err(FlowError::Unauthorized {
                    reason: format!("case {case_id} is held by {holder}, not {me}"),
                })
            }
            None => {
                return Err(FlowError::Unauthorized {
                    reason: format!("{me} is not the investigator of case {case_id}"),
                })
            }
        }
        if !self.identity.owns(&current.investigator.owning_key) {
            return Err(FlowError::Unauthorized {
                reason: format!("{me} does not hold the investigator key for case {case_id}"),
            });
        }
        if new_investigator == me {
            return Err(FlowError::ValidationFailed(format!(
                "case {case_id} is already held by {me}"
            )));
        }

        let fresh = self.identity.mint(new_investigator).await?;
        let produced = current.with_investigator(fresh);
        debug!(case = %case_id, to = %new_investigator, "assembling transfer");

        let tx = TransitionBuilder::transfer(self.notary.clone())
            .add_input(input)
            .add_output(LedgerState::Case(produced))
            .add_signer(current.investigator.owning_key)
            .add_signer(fresh.owning_key)
            .build()?;
        Ok(tx)
    }

    /// The single live version of a case. Zero is `NotFound`; more than one
    /// is a corrupt ledger and is never retried.
    fn live_version(&self, case_id: &CaseId) -> Result<StateAndRef, FlowError> {
        let mut live = self.vault.find_live_by_case_id(case_id)?;
        match live.len() {
            0 => Err(FlowError::NotFound { case_id: *case_id }),
            1 => Ok(live.remove(0)),
            n => {
                error!(case = %case_id, live = n, "ledger holds several live versions of a case");
                Err(FlowError::AmbiguousState {
                    case_id: *case_id,
                    live: n,
                })
            }
        }
    }
}
