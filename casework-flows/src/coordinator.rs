use std::sync::Arc;

use tracing::{debug, info, warn};

use casework_contract::builder::add_signature;
use casework_contract::validation::{validate_transition, verify_signatures};
use casework_crypto::keys::verify;
use casework_notary::notary::Notary;
use casework_storage::vault_store::Vault;
use casework_types::case::CaseRecord;
use casework_types::identity::{AnonymousParty, IdentityCertificate, Party};
use casework_types::network::{SessionMessage, SessionPurpose};
use casework_types::primitives::{short_hex, CaseId, PublicKey, TransitionId};
use casework_types::transition::{
    Intent, NotarisedTransition, SignedTransition, TransitionSignature,
};

use crate::assembler::TransactionAssembler;
use crate::cancel::CancelToken;
use crate::error::FlowError;
use crate::identity::{IdentityError, IdentityFacade};
use crate::progress::{ProgressObserver, ProtocolStep};
use crate::session::{Session, SessionTransport};

/// A counterparty and the required signer keys it answers for.
struct Counterparty {
    party: Party,
    keys: Vec<PublicKey>,
    session: Session,
}

/// Initiator side of the signing protocol.
///
/// Runs `BuildProposal -> LocalValidate -> LocalSign -> [SyncIdentities]
/// -> CollectCounterpartySignatures -> Finalize -> Done`. Any step may end
/// in `Failed`. Nothing is visible outside this node before the first
/// session opens, and nothing is committed before the notary answers.
pub struct SigningCoordinator {
    identity: Arc<dyn IdentityFacade>,
    transport: Arc<dyn SessionTransport>,
    notary: Arc<dyn Notary>,
    vault: Arc<dyn Vault>,
    assembler: TransactionAssembler,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl SigningCoordinator {
    pub fn new(
        identity: Arc<dyn IdentityFacade>,
        transport: Arc<dyn SessionTransport>,
        notary: Arc<dyn Notary>,
        vault: Arc<dyn Vault>,
    ) -> Self {
        let assembler =
            TransactionAssembler::new(identity.clone(), vault.clone(), notary.identity().clone());
        Self {
            identity,
            transport,
            notary,
            vault,
            assembler,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn assembler(&self) -> &TransactionAssembler {
        &self.assembler
    }

    /// Open a case and drive it to finality.
    pub async fn open_case(
        &self,
        subject: &str,
        investigator: &Party,
        cancel: &CancelToken,
    ) -> Result<NotarisedTransition, FlowError> {
        self.report(None, ProtocolStep::BuildProposal);
        let built = cancel
            .guard(self.assembler.assemble_open(subject, investigator))
            .await
            .and_then(|r| r);
        match built {
            Ok(tx) => self.drive(tx, cancel).await,
            Err(e) => Err(self.fail(None, e)),
        }
    }

    /// Transfer a case this node investigates and drive it to finality.
    pub async fn transfer_case(
        &self,
        case_id: &CaseId,
        new_investigator: &Party,
        cancel: &CancelToken,
    ) -> Result<NotarisedTransition, FlowError> {
        self.report(None, ProtocolStep::BuildProposal);
        let built = cancel
            .guard(self.assembler.assemble_transfer(case_id, new_investigator))
            .await
            .and_then(|r| r);
        match built {
            Ok(tx) => self.drive(tx, cancel).await,
            Err(e) => Err(self.fail(None, e)),
        }
    }

    /// Take an assembled proposal through validation, signing, and finality.
    pub async fn drive(
        &self,
        tx: SignedTransition,
        cancel: &CancelToken,
    ) -> Result<NotarisedTransition, FlowError> {
        let id = tx.id;
        match self.run(tx, cancel).await {
            Ok(notarised) => {
                self.report(Some(&id), ProtocolStep::Done);
                Ok(notarised)
            }
            Err(e) => Err(self.fail(Some(&id), e)),
        }
    }

    async fn run(
        &self,
        mut tx: SignedTransition,
        cancel: &CancelToken,
    ) -> Result<NotarisedTransition, FlowError> {
        let id = tx.id;
        let intent = tx.proposal.intent;

        self.report(Some(&id), ProtocolStep::LocalValidate);
        validate_transition(&tx.proposal)?;

        self.report(Some(&id), ProtocolStep::LocalSign);
        let mut own = 0usize;
        for key in tx.proposal.required_signers.clone() {
            if !self.identity.owns(&key) {
                continue;
            }
            let keypair = self.identity.signing_key_for(&AnonymousParty::new(key))?;
            let signature = TransitionSignature {
                by: key,
                signature: keypair.sign(&id),
            };
            add_signature(&mut tx, signature);
            own += 1;
        }
        if own == 0 {
            return Err(FlowError::Unauthorized {
                reason: format!("{} holds none of the required signer keys", self.me()),
            });
        }

        let counterparties = self.counterparty_keys(&tx)?;
        let mut sessions = Vec::with_capacity(counterparties.len());
        for (party, keys) in counterparties {
            let session = cancel
                .guard(self.transport.open_session(self.me(), &party))
                .await??;
            session
                .send(&SessionMessage::Init {
                    purpose: SessionPurpose::Sign(intent),
                    initiator: self.me().clone(),
                })
                .await?;
            sessions.push(Counterparty {
                party,
                keys,
                session,
            });
        }

        match intent {
            Intent::Open => {}
            Intent::Transfer => {
                self.report(Some(&id), ProtocolStep::SyncIdentities);
                let certificates = self.disclosures(&tx);
                for cp in &sessions {
                    let shown: Vec<IdentityCertificate> = certificates
                        .iter()
                        .filter(|c| c.party != cp.party)
                        .cloned()
                        .collect();
                    debug!(
                        tx = %short_hex(&id),
                        to = %cp.party,
                        certificates = shown.len(),
                        "syncing identities"
                    );
                    cp.session
                        .send(&SessionMessage::IdentitySync(shown))
                        .await?;
                }
            }
        }

        self.report(Some(&id), ProtocolStep::CollectCounterpartySignatures);
        for cp in &mut sessions {
            cp.session
                .send(&SessionMessage::Proposal(Box::new(tx.clone())))
                .await?;
            let mut pending = cp.keys.clone();
            while !pending.is_empty() {
                let reply = cancel.guard(cp.session.receive()).await??;
                match reply {
                    SessionMessage::Signature(sig) => {
                        if !pending.contains(&sig.by) {
                            return Err(FlowError::transport(format!(
                                "{} signed with unexpected key {}",
                                cp.party,
                                short_hex(&sig.by)
                            )));
                        }
                        verify(&id, &sig.signature, &sig.by).map_err(|_| {
                            FlowError::transport(format!("{} returned a bad signature", cp.party))
                        })?;
                        pending.retain(|k| *k != sig.by);
                        add_signature(&mut tx, sig);
                    }
                    SessionMessage::Rejected { reason } => {
                        warn!(
                            tx = %short_hex(&id),
                            party = %cp.party,
                            reason = %reason,
                            "counterparty rejected"
                        );
                        return Err(FlowError::CounterpartyRejected {
                            party: cp.party.name.clone(),
                            reason,
                        });
                    }
                    other => {
                        return Err(FlowError::transport(format!(
                            "expected a signature from {}, got {}",
                            cp.party,
                            other.kind()
                        )))
                    }
                }
            }
            debug!(tx = %short_hex(&id), party = %cp.party, "collected signatures");
        }

        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        self.report(Some(&id), ProtocolStep::Finalize);
        verify_signatures(&tx)?;
        let notarised = match self.notary.submit(tx).await {
            Ok(notarised) => notarised,
            Err(e) => {
                let err = FlowError::from(e);
                for cp in &sessions {
                    let sent = cp
                        .session
                        .send(&SessionMessage::Rejected {
                            reason: err.to_string(),
                        })
                        .await;
                    if let Err(e) = sent {
                        warn!(
                            tx = %short_hex(&id),
                            to = %cp.party,
                            error = %e,
                            "could not report finality failure"
                        );
                    }
                }
                return Err(err);
            }
        };

        self.record(&notarised)?;
        info!(
            tx = %short_hex(&id),
            intent = %intent,
            "transition finalized"
        );
        self.broadcast(&notarised, &sessions).await;
        Ok(notarised)
    }

    /// Required signers this node does not own, grouped by the party they
    /// resolve to.
    fn counterparty_keys(
        &self,
        tx: &SignedTransition,
    ) -> Result<Vec<(Party, Vec<PublicKey>)>, FlowError> {
        let mut grouped: Vec<(Party, Vec<PublicKey>)> = Vec::new();
        for key in &tx.proposal.required_signers {
            if self.identity.owns(key) {
                continue;
            }
            let pseudonym = AnonymousParty::new(*key);
            let party = self
                .identity
                .resolve(&pseudonym)
                .ok_or(IdentityError::Unresolved(pseudonym))?;
            match grouped.iter_mut().find(|(p, _)| *p == party) {
                Some((_, keys)) => keys.push(*key),
                None => grouped.push((party, vec![*key])),
            }
        }
        Ok(grouped)
    }

    /// Certificates for every pseudonym on the consumed and produced records
    /// that this node can vouch for.
    fn disclosures(&self, tx: &SignedTransition) -> Vec<IdentityCertificate> {
        let mut seen = Vec::new();
        let mut certificates = Vec::new();
        let records = tx
            .proposal
            .consumed_cases()
            .chain(tx.proposal.produced_cases());
        for record in records {
            for pseudonym in record.participants() {
                if seen.contains(&pseudonym) {
                    continue;
                }
                seen.push(pseudonym);
                if let Some(cert) = self.identity.certificate(&pseudonym) {
                    certificates.push(cert);
                }
            }
        }
        certificates
    }

    fn record(&self, tx: &NotarisedTransition) -> Result<(), FlowError> {
        let relevant = |record: &CaseRecord| {
            record
                .participants()
                .iter()
                .any(|p| self.identity.owns(&p.owning_key))
        };
        self.vault.record_accepted(tx, &relevant)?;
        Ok(())
    }

    /// Hand the committed transition to every other participant of the
    /// produced records. Failures here are logged; the commit already stands.
    async fn broadcast(&self, tx: &NotarisedTransition, sessions: &[Counterparty]) {
        let mut recipients: Vec<Party> = Vec::new();
        for record in tx.proposal().produced_cases() {
            for pseudonym in record.participants() {
                if self.identity.owns(&pseudonym.owning_key) {
                    continue;
                }
                match self.identity.resolve(&pseudonym) {
                    Some(party) if !recipients.contains(&party) => recipients.push(party),
                    Some(_) => {}
                    None => warn!(
                        tx = %short_hex(tx.id()),
                        pseudonym = %pseudonym,
                        "cannot resolve participant for finality"
                    ),
                }
            }
        }

        let finalized = SessionMessage::Finalized(Box::new(tx.clone()));
        for party in recipients {
            let sent = match sessions.iter().find(|cp| cp.party == party) {
                Some(cp) => cp.session.send(&finalized).await,
                None => self.send_record(&party, &finalized).await,
            };
            match sent {
                Ok(()) => debug!(tx = %short_hex(tx.id()), to = %party, "sent finalized transition"),
                Err(e) => warn!(
                    tx = %short_hex(tx.id()),
                    to = %party,
                    error = %e,
                    "finality broadcast failed"
                ),
            }
        }
    }

    async fn send_record(&self, to: &Party, msg: &SessionMessage) -> Result<(), FlowError> {
        let session = self.transport.open_session(self.me(), to).await?;
        session
            .send(&SessionMessage::Init {
                purpose: SessionPurpose::Record,
                initiator: self.me().clone(),
            })
            .await?;
        session.send(msg).await
    }

    fn me(&self) -> &Party {
        self.identity.me()
    }

    fn report(&self, tx: Option<&TransitionId>, step: ProtocolStep) {
        match tx {
            Some(id) => debug!(tx = %short_hex(id), step = %step, "protocol step"),
            None => debug!(step = %step, "protocol step"),
        }
        if let Some(observer) = &self.observer {
            observer.on_step(tx, &step);
        }
    }

    fn fail(&self, tx: Option<&TransitionId>, e: FlowError) -> FlowError {
        warn!(error = %e, "protocol run failed");
        self.report(tx, ProtocolStep::Failed(e.to_string()));
        e
    }
}
