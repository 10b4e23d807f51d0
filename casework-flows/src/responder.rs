use std::sync::Arc;

use tracing::{debug, info, warn};

use casework_contract::validation::{
    validate_transition, verify_partial_signatures, verify_signatures,
};
use casework_notary::notary::verify_notarisation;
use casework_storage::vault_store::Vault;
use casework_types::case::CaseRecord;
use casework_types::identity::{AnonymousParty, Party};
use casework_types::network::{SessionMessage, SessionPurpose};
use casework_types::primitives::{short_hex, TransitionId};
use casework_types::transition::{
    Intent, NotarisedTransition, SignedTransition, TransitionSignature,
};

use crate::error::FlowError;
use crate::identity::IdentityFacade;
use crate::session::Session;

/// Business checks a responder applies on top of contract validation.
///
/// Runs after every protocol check has passed. Returning `Err` declines the
/// proposal with that reason.
pub trait ProposalCheck: Send + Sync {
    fn check(&self, tx: &SignedTransition, identity: &dyn IdentityFacade) -> Result<(), String>;
}

/// Signs anything that passes the protocol checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ProposalCheck for AcceptAll {
    fn check(&self, _tx: &SignedTransition, _identity: &dyn IdentityFacade) -> Result<(), String> {
        Ok(())
    }
}

/// How an inbound session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderOutcome {
    /// A finalized transition was recorded in the vault.
    Recorded(TransitionId),
    /// The proposal was declined with this reason.
    Declined(String),
    /// Signed, but the initiator reported that finality failed.
    Abandoned(String),
}

/// Counterparty side of the signing protocol.
pub struct Responder {
    identity: Arc<dyn IdentityFacade>,
    vault: Arc<dyn Vault>,
    notary: Party,
    check: Arc<dyn ProposalCheck>,
}

impl Responder {
    pub fn new(identity: Arc<dyn IdentityFacade>, vault: Arc<dyn Vault>, notary: Party) -> Self {
        Self {
            identity,
            vault,
            notary,
            check: Arc::new(AcceptAll),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn ProposalCheck>) -> Self {
        self.check = check;
        self
    }

    /// Serve one inbound session from its first frame to its end.
    pub async fn handle(&self, mut session: Session) -> Result<ResponderOutcome, FlowError> {
        let (purpose, initiator) = match session.receive().await? {
            SessionMessage::Init { purpose, initiator } => (purpose, initiator),
            other => {
                return Err(FlowError::transport(format!(
                    "session opened with {} instead of init",
                    other.kind()
                )))
            }
        };
        if &initiator != session.peer() {
            let reason = format!(
                "session from {} claims to be from {initiator}",
                session.peer()
            );
            session
                .send(&SessionMessage::Rejected {
                    reason: reason.clone(),
                })
                .await?;
            return Ok(ResponderOutcome::Declined(reason));
        }

        match purpose {
            SessionPurpose::Sign(intent) => self.respond(session, intent).await,
            SessionPurpose::Record => self.receive_finality(session).await,
        }
    }

    /// `AwaitProposal -> [ReceiveIdentitySync] -> LocalValidate -> Decide`,
    /// then wait for the committed transition.
    async fn respond(
        &self,
        mut session: Session,
        intent: Intent,
    ) -> Result<ResponderOutcome, FlowError> {
        let peer = session.peer().clone();

        let tx = loop {
            match session.receive().await? {
                SessionMessage::IdentitySync(certificates) if intent == Intent::Transfer => {
                    debug!(
                        from = %peer,
                        certificates = certificates.len(),
                        "received identity sync"
                    );
                    for certificate in certificates {
                        if let Err(e) = self.identity.learn(certificate) {
                            return self.decline(&session, e.to_string()).await;
                        }
                    }
                }
                SessionMessage::Proposal(tx) => break *tx,
                other => {
                    let reason = format!("unexpected {} while awaiting a proposal", other.kind());
                    return self.decline(&session, reason).await;
                }
            }
        };

        let signatures = match self.decide(&tx, intent, &peer) {
            Ok(signatures) => signatures,
            Err(reason) => return self.decline(&session, reason).await,
        };
        info!(
            tx = %short_hex(&tx.id),
            intent = %intent,
            from = %peer,
            "countersigning proposal"
        );
        for signature in signatures {
            session.send(&SessionMessage::Signature(signature)).await?;
        }

        match session.receive().await? {
            SessionMessage::Finalized(notarised) if notarised.id() == &tx.id => {
                self.record(&notarised)?;
                Ok(ResponderOutcome::Recorded(tx.id))
            }
            SessionMessage::Finalized(_) => Err(FlowError::transport(
                "finalized transition does not match the signed proposal",
            )),
            SessionMessage::Rejected { reason } => {
                warn!(
                    tx = %short_hex(&tx.id),
                    reason = %reason,
                    "signed proposal was not finalized"
                );
                Ok(ResponderOutcome::Abandoned(reason))
            }
            other => Err(FlowError::transport(format!(
                "expected finalized transition, got {}",
                other.kind()
            ))),
        }
    }

    /// Every check a proposal must pass before this node signs it. Returns
    /// this node's signatures, or the reason to decline.
    fn decide(
        &self,
        tx: &SignedTransition,
        intent: Intent,
        peer: &Party,
    ) -> Result<Vec<TransitionSignature>, String> {
        if tx.proposal.intent != intent {
            return Err(format!(
                "session was opened for {intent} but the proposal is {}",
                tx.proposal.intent
            ));
        }
        if tx.proposal.notary != self.notary {
            return Err(format!("unknown notary {}", tx.proposal.notary));
        }

        validate_transition(&tx.proposal).map_err(|v| v.to_string())?;
        verify_partial_signatures(tx).map_err(|v| v.to_string())?;

        let signed_by_peer = tx
            .signed_by()
            .any(|key| self.identity.resolve(&AnonymousParty::new(*key)).as_ref() == Some(peer));
        if !signed_by_peer {
            return Err(format!("proposal is not signed by {peer}"));
        }

        let ours: Vec<AnonymousParty> = tx
            .proposal
            .required_signers
            .iter()
            .filter(|key| self.identity.owns(key))
            .map(|key| AnonymousParty::new(*key))
            .collect();
        if ours.is_empty() {
            return Err(format!("{} is not a required signer", self.identity.me()));
        }

        let records = tx
            .proposal
            .consumed_cases()
            .chain(tx.proposal.produced_cases());
        for record in records {
            for pseudonym in record.participants() {
                if self.identity.resolve(&pseudonym).is_none() {
                    return Err(format!("cannot resolve participant {pseudonym}"));
                }
            }
        }

        self.check.check(tx, self.identity.as_ref())?;

        ours.iter()
            .map(|pseudonym| -> Result<TransitionSignature, String> {
                let keypair = self
                    .identity
                    .signing_key_for(pseudonym)
                    .map_err(|e| e.to_string())?;
                Ok(TransitionSignature {
                    by: pseudonym.owning_key,
                    signature: keypair.sign(&tx.id),
                })
            })
            .collect()
    }

    async fn decline(
        &self,
        session: &Session,
        reason: String,
    ) -> Result<ResponderOutcome, FlowError> {
        warn!(from = %session.peer(), reason = %reason, "declining proposal");
        session
            .send(&SessionMessage::Rejected {
                reason: reason.clone(),
            })
            .await?;
        Ok(ResponderOutcome::Declined(reason))
    }

    /// Accept a committed transition this node did not sign.
    async fn receive_finality(&self, mut session: Session) -> Result<ResponderOutcome, FlowError> {
        let notarised = match session.receive().await? {
            SessionMessage::Finalized(notarised) => *notarised,
            other => {
                return Err(FlowError::transport(format!(
                    "expected finalized transition, got {}",
                    other.kind()
                )))
            }
        };
        let id = *notarised.id();

        let relevant = notarised
            .proposal()
            .produced_cases()
            .any(|record| self.is_participant(record));
        if !relevant {
            warn!(
                tx = %short_hex(&id),
                from = %session.peer(),
                "ignoring transition for other parties"
            );
            return Ok(ResponderOutcome::Declined(
                "transition has no participant on this node".to_string(),
            ));
        }
        validate_transition(notarised.proposal())?;
        self.record(&notarised)?;
        Ok(ResponderOutcome::Recorded(id))
    }

    fn record(&self, notarised: &NotarisedTransition) -> Result<(), FlowError> {
        if notarised.proposal().notary != self.notary {
            return Err(FlowError::FinalityRejected {
                reason: format!("finalized by unknown notary {}", notarised.proposal().notary),
            });
        }
        verify_notarisation(notarised, &self.notary).map_err(|e| FlowError::FinalityRejected {
            reason: e.to_string(),
        })?;
        verify_signatures(&notarised.transition)?;

        let relevant = |record: &CaseRecord| self.is_participant(record);
        self.vault.record_accepted(notarised, &relevant)?;
        info!(tx = %short_hex(notarised.id()), "recorded finalized transition");
        Ok(())
    }

    fn is_participant(&self, record: &CaseRecord) -> bool {
        record
            .participants()
            .iter()
            .any(|p| self.identity.owns(&p.owning_key))
    }
}
