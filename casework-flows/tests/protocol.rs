use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use casework_contract::builder::{add_signature, sign_transition, unsigned, TransitionBuilder};
use casework_crypto::keys::Keypair;
use casework_flows::cancel::{cancel_pair, CancelToken};
use casework_flows::error::FlowError;
use casework_flows::identity::{IdentityFacade, IdentityService, IdentityWallet};
use casework_flows::network::InMemoryNetwork;
use casework_flows::progress::{ProtocolStep, StepLog};
use casework_flows::responder::{ProposalCheck, Responder, ResponderOutcome};
use casework_flows::session::{Session, SessionTransport};
use casework_notary::error::NotaryError;
use casework_notary::notary::{Notary, UniquenessNotary};
use casework_storage::error::StorageError;
use casework_storage::memory::MemoryStore;
use casework_storage::vault_store::{Vault, VaultEntry, VaultStore};
use casework_types::case::{CaseRecord, LedgerState, RecordRef, StateAndRef};
use casework_types::identity::{AnonymousParty, Party};
use casework_types::network::{SessionMessage, SessionPurpose};
use casework_types::primitives::{CaseId, TransitionId};
use casework_types::transition::{Intent, NotarisedTransition, SignedTransition};

use casework_flows::coordinator::SigningCoordinator;

const NOTARY_SEED: [u8; 32] = [0x4e; 32];

/// Wraps the real notary and counts submissions.
struct CountingNotary {
    inner: UniquenessNotary<MemoryStore>,
    submissions: AtomicUsize,
}

#[async_trait]
impl Notary for CountingNotary {
    fn identity(&self) -> &Party {
        self.inner.identity()
    }

    async fn submit(&self, tx: SignedTransition) -> Result<NotarisedTransition, NotaryError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(tx).await
    }
}

struct Net {
    network: Arc<InMemoryNetwork>,
    notary: Arc<CountingNotary>,
}

impl Net {
    fn new() -> Self {
        Self {
            network: Arc::new(InMemoryNetwork::new()),
            notary: Arc::new(CountingNotary {
                inner: UniquenessNotary::new(
                    "Notary",
                    Keypair::from_seed(&NOTARY_SEED),
                    MemoryStore::new(),
                    true,
                ),
                submissions: AtomicUsize::new(0),
            }),
        }
    }

    fn submissions(&self) -> usize {
        self.notary.submissions.load(Ordering::SeqCst)
    }

    /// A node that answers sessions with `check`.
    fn peer_with(&self, name: &str, check: Option<Arc<dyn ProposalCheck>>) -> Peer {
        let wallet = Arc::new(IdentityWallet::new(name, Keypair::generate()));
        let inbound = self.network.register(wallet.clone());
        let identity: Arc<dyn IdentityFacade> =
            Arc::new(IdentityService::new(wallet.clone(), self.network.clone()));
        let vault = Arc::new(VaultStore::new(MemoryStore::new()));
        let steps = Arc::new(StepLog::new());
        let coordinator = SigningCoordinator::new(
            identity.clone(),
            self.network.clone(),
            self.notary.clone(),
            vault.clone(),
        )
        .with_observer(steps.clone());

        let mut responder = Responder::new(
            identity.clone(),
            vault.clone(),
            self.notary.identity().clone(),
        );
        if let Some(check) = check {
            responder = responder.with_check(check);
        }
        let (out_tx, outcomes) = mpsc::unbounded_channel();
        tokio::spawn(serve(responder, inbound, out_tx));

        Peer {
            party: wallet.party().clone(),
            identity,
            vault,
            steps,
            coordinator,
            outcomes,
        }
    }

    fn peer(&self, name: &str) -> Peer {
        self.peer_with(name, None)
    }
}

async fn serve(
    responder: Responder,
    mut inbound: mpsc::Receiver<Session>,
    outcomes: mpsc::UnboundedSender<Result<ResponderOutcome, String>>,
) {
    while let Some(session) = inbound.recv().await {
        let outcome = responder.handle(session).await.map_err(|e| e.to_string());
        let _ = outcomes.send(outcome);
    }
}

struct Peer {
    party: Party,
    identity: Arc<dyn IdentityFacade>,
    vault: Arc<VaultStore<MemoryStore>>,
    steps: Arc<StepLog>,
    coordinator: SigningCoordinator,
    outcomes: mpsc::UnboundedReceiver<Result<ResponderOutcome, String>>,
}

impl Peer {
    async fn next_outcome(&mut self) -> Result<ResponderOutcome, String> {
        tokio::time::timeout(Duration::from_secs(5), self.outcomes.recv())
            .await
            .expect("responder outcome in time")
            .expect("responder loop alive")
    }

    fn live(&self, case_id: &CaseId) -> Vec<StateAndRef> {
        self.vault.find_live_by_case_id(case_id).unwrap()
    }
}

fn case_of(tx: &NotarisedTransition) -> CaseRecord {
    tx.proposal().produced[0].as_case().unwrap().clone()
}

#[tokio::test]
async fn test_open_reaches_done_and_both_sides_record() {
    let net = Net::new();
    let a = net.peer("Alice");
    let mut b = net.peer("Bob");

    let tx = a
        .coordinator
        .open_case("Enron", &b.party, &CancelToken::never())
        .await
        .unwrap();
    let record = case_of(&tx);

    assert_eq!(b.next_outcome().await, Ok(ResponderOutcome::Recorded(*tx.id())));
    assert_eq!(a.live(&record.case_id).len(), 1);
    assert_eq!(b.live(&record.case_id).len(), 1);

    assert_eq!(a.identity.resolve(&record.investigator), Some(b.party.clone()));
    assert_eq!(b.identity.resolve(&record.reporter), Some(a.party.clone()));

    assert_eq!(
        a.steps.steps(),
        vec![
            ProtocolStep::BuildProposal,
            ProtocolStep::LocalValidate,
            ProtocolStep::LocalSign,
            ProtocolStep::CollectCounterpartySignatures,
            ProtocolStep::Finalize,
            ProtocolStep::Done,
        ]
    );
}

#[tokio::test]
async fn test_transfer_syncs_identities_and_informs_reporter() {
    let net = Net::new();
    let mut a = net.peer("Alice");
    let mut b = net.peer("Bob");
    let mut c = net.peer("Carol");

    let opened = a
        .coordinator
        .open_case("Enron", &b.party, &CancelToken::never())
        .await
        .unwrap();
    b.next_outcome().await.unwrap();
    let case_id = case_of(&opened).case_id;

    let moved = b
        .coordinator
        .transfer_case(&case_id, &c.party, &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(c.next_outcome().await, Ok(ResponderOutcome::Recorded(*moved.id())));
    assert_eq!(a.next_outcome().await, Ok(ResponderOutcome::Recorded(*moved.id())));

    let record = case_of(&moved);
    assert!(b.steps.steps().contains(&ProtocolStep::SyncIdentities));

    // The new investigator learned who the reporter is.
    assert_eq!(c.identity.resolve(&record.reporter), Some(a.party.clone()));
    assert_eq!(c.identity.resolve(&record.investigator), Some(c.party.clone()));
    // The reporter was never told who the new investigator is.
    assert_eq!(a.identity.resolve(&record.investigator), None);

    assert!(b.live(&case_id).is_empty());
    assert_eq!(a.live(&case_id).len(), 1);
    assert_eq!(c.live(&case_id).len(), 1);
    assert_eq!(a.vault.lineage(&case_id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_transfer_by_reporter_is_unauthorized_before_any_session() {
    let net = Net::new();
    let a = net.peer("Alice");
    let mut b = net.peer("Bob");
    let c = net.peer("Carol");

    let opened = a
        .coordinator
        .open_case("Enron", &b.party, &CancelToken::never())
        .await
        .unwrap();
    b.next_outcome().await.unwrap();
    let before = net.submissions();

    let err = a
        .coordinator
        .transfer_case(&case_of(&opened).case_id, &c.party, &CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Unauthorized { .. }));
    assert_eq!(net.submissions(), before);
    assert!(matches!(
        a.steps.steps().last(),
        Some(ProtocolStep::Failed(_))
    ));
}

#[tokio::test]
async fn test_transfer_of_unknown_case_is_not_found() {
    let net = Net::new();
    let b = net.peer("Bob");
    let c = net.peer("Carol");
    let err = b
        .coordinator
        .transfer_case(&CaseId::random(), &c.party, &CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotFound { .. }));
}

#[tokio::test]
async fn test_competing_transfers_one_conflicts() {
    let net = Net::new();
    let a = net.peer("Alice");
    let mut b = net.peer("Bob");
    let mut c = net.peer("Carol");
    let mut d = net.peer("Dave");

    let opened = a
        .coordinator
        .open_case("Enron", &b.party, &CancelToken::never())
        .await
        .unwrap();
    b.next_outcome().await.unwrap();
    let case_id = case_of(&opened).case_id;

    let assembler = b.coordinator.assembler();
    let to_c = assembler.assemble_transfer(&case_id, &c.party).await.unwrap();
    let to_d = assembler.assemble_transfer(&case_id, &d.party).await.unwrap();

    let never = CancelToken::never();
    let (first, second) = tokio::join!(
        b.coordinator.drive(to_c, &never),
        b.coordinator.drive(to_d, &never)
    );

    let results = [first, second];
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(FlowError::Conflict(_))))
        .count();
    assert_eq!((accepted, conflicts), (1, 1));

    let outcomes = [c.next_outcome().await, d.next_outcome().await];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, Ok(ResponderOutcome::Abandoned(_))))
            .count(),
        1
    );
    assert!(b.live(&case_id).is_empty());
}

#[tokio::test]
async fn test_tampered_proposal_is_declined_by_counterparty() {
    let net = Net::new();
    let a = net.peer("Alice");
    let mut b = net.peer("Bob");
    let mut c = net.peer("Carol");

    let opened = a
        .coordinator
        .open_case("Enron", &b.party, &CancelToken::never())
        .await
        .unwrap();
    b.next_outcome().await.unwrap();
    let original = case_of(&opened);

    let honest = b
        .coordinator
        .assembler()
        .assemble_transfer(&original.case_id, &c.party)
        .await
        .unwrap();
    let mut proposal = honest.proposal.clone();
    if let LedgerState::Case(record) = &mut proposal.produced[0] {
        record.subject = "Worldcom".to_string();
    }
    let mut tampered = unsigned(proposal).unwrap();
    let key = b.identity.signing_key_for(&original.investigator).unwrap();
    let sig = sign_transition(&tampered, &key);
    add_signature(&mut tampered, sig);

    let mut session = net.network.open_session(&b.party, &c.party).await.unwrap();
    session
        .send(&SessionMessage::Init {
            purpose: SessionPurpose::Sign(Intent::Transfer),
            initiator: b.party.clone(),
        })
        .await
        .unwrap();
    let certs = vec![
        b.identity.certificate(&original.reporter).unwrap(),
        b.identity.certificate(&original.investigator).unwrap(),
    ];
    session
        .send(&SessionMessage::IdentitySync(certs))
        .await
        .unwrap();
    session
        .send(&SessionMessage::Proposal(Box::new(tampered)))
        .await
        .unwrap();

    match session.receive().await.unwrap() {
        SessionMessage::Rejected { reason } => {
            assert_eq!(
                reason,
                "A transfer transaction should only update the investigator field."
            )
        }
        other => panic!("expected rejection, got {}", other.kind()),
    }
    assert!(matches!(
        c.next_outcome().await,
        Ok(ResponderOutcome::Declined(_))
    ));
}

struct Refuse;

impl ProposalCheck for Refuse {
    fn check(&self, _tx: &SignedTransition, _identity: &dyn IdentityFacade) -> Result<(), String> {
        Err("case load is full".to_string())
    }
}

#[tokio::test]
async fn test_rejection_never_reaches_notary() {
    let net = Net::new();
    let a = net.peer("Alice");
    let mut b = net.peer_with("Bob", Some(Arc::new(Refuse)));

    let err = a
        .coordinator
        .open_case("Enron", &b.party, &CancelToken::never())
        .await
        .unwrap_err();
    match err {
        FlowError::CounterpartyRejected { party, reason } => {
            assert_eq!(party, "Bob");
            assert_eq!(reason, "case load is full");
        }
        other => panic!("expected counterparty rejection, got {other}"),
    }
    assert_eq!(net.submissions(), 0);
    assert!(a.vault.live_records().unwrap().is_empty());
    assert_eq!(
        b.next_outcome().await,
        Ok(ResponderOutcome::Declined("case load is full".to_string()))
    );
}

#[tokio::test]
async fn test_cancel_while_waiting_for_silent_counterparty() {
    let net = Net::new();
    let a = net.peer("Alice");

    // Registered but never answers.
    let silent = Arc::new(IdentityWallet::new("Silent", Keypair::generate()));
    let _held = net.network.register(silent.clone());

    let (handle, token) = cancel_pair();
    let (result, _) = tokio::join!(
        a.coordinator.open_case("Enron", silent.party(), &token),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        }
    );
    assert!(matches!(result, Err(FlowError::Cancelled)));
    assert_eq!(net.submissions(), 0);
    assert!(a.vault.live_records().unwrap().is_empty());
}

#[tokio::test]
async fn test_subject_is_free_text() {
    let net = Net::new();
    let a = net.peer("Alice");
    let mut b = net.peer("Bob");

    for subject in [String::new(), "x".repeat(300)] {
        let tx = a
            .coordinator
            .open_case(&subject, &b.party, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(case_of(&tx).subject, subject);
        assert_eq!(b.next_outcome().await, Ok(ResponderOutcome::Recorded(*tx.id())));
    }
    assert_eq!(net.submissions(), 2);
}

#[tokio::test]
async fn test_open_with_self_is_rejected() {
    let net = Net::new();
    let a = net.peer("Alice");
    let err = a
        .coordinator
        .open_case("Enron", &a.party, &CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::ValidationFailed(_)));
}

/// A vault whose ledger has been corrupted with two live versions.
struct DoubleLive(StateAndRef);

impl Vault for DoubleLive {
    fn find_live_by_case_id(&self, _: &CaseId) -> Result<Vec<StateAndRef>, StorageError> {
        Ok(vec![self.0.clone(), self.0.clone()])
    }

    fn record_accepted(
        &self,
        _: &NotarisedTransition,
        _: &dyn Fn(&CaseRecord) -> bool,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn live_records(&self) -> Result<Vec<StateAndRef>, StorageError> {
        Ok(vec![])
    }

    fn lineage(&self, _: &CaseId) -> Result<Vec<VaultEntry>, StorageError> {
        Ok(vec![])
    }

    fn transition(&self, _: &TransitionId) -> Result<Option<NotarisedTransition>, StorageError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_several_live_versions_is_ambiguous() {
    let net = InMemoryNetwork::new();
    let wallet = Arc::new(IdentityWallet::new("Bob", Keypair::generate()));
    let network = Arc::new(net);
    let _rx = network.register(wallet.clone());
    let identity: Arc<dyn IdentityFacade> =
        Arc::new(IdentityService::new(wallet.clone(), network.clone()));

    let record = CaseRecord::open(
        "Enron",
        AnonymousParty::new([1u8; 32]),
        AnonymousParty::new([2u8; 32]),
    );
    let case_id = record.case_id;
    let entry = StateAndRef {
        state: LedgerState::Case(record),
        reference: casework_types::case::RecordRef {
            transition_id: [3u8; 32],
            index: 0,
        },
    };
    let assembler = casework_flows::assembler::TransactionAssembler::new(
        identity,
        Arc::new(DoubleLive(entry)),
        Party::new("Notary", [4u8; 32]),
    );
    let err = assembler
        .assemble_transfer(&case_id, &Party::new("Carol", [5u8; 32]))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::AmbiguousState { live: 2, .. }));
}

/// Bob, after handing the case to Carol, re-spends the original version to a
/// pseudonym of his own and presents it to Alice as finalized, signed with
/// `notary_key` instead of going through the notary.
async fn forged_double_spend(
    net: &Net,
    notary_key: &Keypair,
) -> (Peer, Peer, CaseId, Result<ResponderOutcome, String>) {
    let mut a = net.peer("Alice");
    let mut b = net.peer("Bob");
    let mut c = net.peer("Carol");

    let opened = a
        .coordinator
        .open_case("Enron", &b.party, &CancelToken::never())
        .await
        .unwrap();
    b.next_outcome().await.unwrap();
    let original = case_of(&opened);

    b.coordinator
        .transfer_case(&original.case_id, &c.party, &CancelToken::never())
        .await
        .unwrap();
    c.next_outcome().await.unwrap();
    a.next_outcome().await.unwrap();

    let keep = b.identity.mint(&b.party).await.unwrap();
    let spent = StateAndRef {
        state: LedgerState::Case(original.clone()),
        reference: RecordRef {
            transition_id: *opened.id(),
            index: 0,
        },
    };
    let mut tx = TransitionBuilder::transfer(net.notary.identity().clone())
        .add_input(spent)
        .add_output(LedgerState::Case(original.with_investigator(keep)))
        .add_signer(original.investigator.owning_key)
        .add_signer(keep.owning_key)
        .build()
        .unwrap();
    for pseudonym in [original.investigator, keep] {
        let key = b.identity.signing_key_for(&pseudonym).unwrap();
        let sig = sign_transition(&tx, &key);
        add_signature(&mut tx, sig);
    }
    let forged = NotarisedTransition {
        notary_signature: notary_key.sign(&tx.id),
        transition: tx,
    };

    let session = net.network.open_session(&b.party, &a.party).await.unwrap();
    session
        .send(&SessionMessage::Init {
            purpose: SessionPurpose::Record,
            initiator: b.party.clone(),
        })
        .await
        .unwrap();
    session
        .send(&SessionMessage::Finalized(Box::new(forged)))
        .await
        .unwrap();
    let outcome = a.next_outcome().await;
    (a, c, original.case_id, outcome)
}

#[tokio::test]
async fn test_finality_not_signed_by_notary_is_refused() {
    let net = Net::new();
    let (a, c, case_id, outcome) = forged_double_spend(&net, &Keypair::generate()).await;

    let err = outcome.unwrap_err();
    assert!(err.starts_with("finality rejected"), "got {err}");
    assert_eq!(net.submissions(), 2);
    assert_eq!(a.live(&case_id).len(), 1);
    assert_eq!(a.live(&case_id), c.live(&case_id));
}

#[tokio::test]
async fn test_reporter_vault_refuses_second_spend_even_with_notary_signature() {
    let net = Net::new();
    let (a, c, case_id, outcome) =
        forged_double_spend(&net, &Keypair::from_seed(&NOTARY_SEED)).await;

    let err = outcome.unwrap_err();
    assert!(err.contains("already consumed"), "got {err}");
    assert_eq!(net.submissions(), 2);
    assert_eq!(a.live(&case_id).len(), 1);
    assert_eq!(a.live(&case_id), c.live(&case_id));
}
