use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use casework_flows::cancel::CancelToken;
use casework_flows::coordinator::SigningCoordinator;
use casework_flows::error::FlowError;
use casework_flows::identity::{IdentityFacade, IdentityService, IdentityWallet};
use casework_flows::network::InMemoryNetwork;
use casework_flows::progress::ProgressObserver;
use casework_flows::responder::{AcceptAll, ProposalCheck, Responder, ResponderOutcome};
use casework_flows::session::Session;
use casework_notary::notary::{Notary, UniquenessNotary};
use casework_storage::memory::MemoryStore;
use casework_storage::sqlite::SqliteStore;
use casework_storage::traits::BatchWriter;
use casework_storage::vault_store::{Vault, VaultEntry, VaultStore};
use casework_types::case::CaseRecord;
use casework_types::identity::{AnonymousParty, Party};
use casework_types::primitives::{short_hex, CaseId, TransitionId};

use crate::config::{NodeConfig, ProtocolConfig};
use crate::error::NodeError;

/// Optional behaviour plugged into a node at start.
pub struct NodeHooks {
    /// Extra checks before countersigning.
    pub check: Arc<dyn ProposalCheck>,
    pub observer: Option<Arc<dyn ProgressObserver>>,
}

impl Default for NodeHooks {
    fn default() -> Self {
        Self {
            check: Arc::new(AcceptAll),
            observer: None,
        }
    }
}

/// Create the vault's backing store from the node configuration.
fn create_store(config: &NodeConfig) -> Result<Box<dyn BatchWriter>, NodeError> {
    match config.storage.db_type.as_str() {
        "memory" => Ok(Box::new(MemoryStore::new())),
        "sqlite" => {
            let data_dir = Path::new(&config.storage.path);
            std::fs::create_dir_all(data_dir)?;
            let db_path = data_dir.join(format!("{}.db", config.identity.name));
            Ok(Box::new(SqliteStore::open(db_path)?))
        }
        other => Err(NodeError::ConfigError {
            reason: format!(
                "unknown storage backend '{}', expected 'memory' or 'sqlite'",
                other
            ),
        }),
    }
}

/// An in-process notary for networks where every participant runs in one
/// process. Its key comes from `notary_seed`, or is random.
pub fn standalone_notary(
    protocol: &ProtocolConfig,
) -> Result<UniquenessNotary<MemoryStore>, NodeError> {
    Ok(UniquenessNotary::new(
        protocol.notary_name.clone(),
        protocol.notary_keypair()?,
        MemoryStore::new(),
        protocol.validating_notary,
    ))
}

/// One party on the ledger.
///
/// Answers inbound sessions in the background for as long as it lives.
pub struct CaseNode {
    party: Party,
    identity: Arc<dyn IdentityFacade>,
    vault: Arc<dyn Vault>,
    coordinator: SigningCoordinator,
    network: Arc<InMemoryNetwork>,
    responder_task: JoinHandle<()>,
}

impl CaseNode {
    /// Start a node on `network`, finalizing through `notary`.
    pub async fn start(
        config: NodeConfig,
        network: Arc<InMemoryNetwork>,
        notary: Arc<dyn Notary>,
    ) -> Result<Self, NodeError> {
        Self::start_with(config, network, notary, NodeHooks::default()).await
    }

    pub async fn start_with(
        config: NodeConfig,
        network: Arc<InMemoryNetwork>,
        notary: Arc<dyn Notary>,
        hooks: NodeHooks,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        if notary.identity().name != config.protocol.notary_name {
            return Err(NodeError::ConfigError {
                reason: format!(
                    "configured notary is '{}' but the network notary is '{}'",
                    config.protocol.notary_name,
                    notary.identity().name
                ),
            });
        }

        let keypair = config.keypair()?;
        let wallet = Arc::new(IdentityWallet::new(config.identity.name.clone(), keypair));
        let party = wallet.party().clone();
        let inbound = network.register(wallet.clone());

        let identity: Arc<dyn IdentityFacade> =
            Arc::new(IdentityService::new(wallet, network.clone()));
        let vault: Arc<dyn Vault> = Arc::new(VaultStore::new(create_store(&config)?));

        let mut coordinator = SigningCoordinator::new(
            identity.clone(),
            network.clone(),
            notary.clone(),
            vault.clone(),
        );
        if let Some(observer) = hooks.observer {
            coordinator = coordinator.with_observer(observer);
        }

        let responder = Arc::new(
            Responder::new(identity.clone(), vault.clone(), notary.identity().clone())
                .with_check(hooks.check),
        );
        let responder_task = tokio::spawn(serve(responder, inbound, party.clone()));

        info!(
            party = %party,
            key = %short_hex(&party.owning_key),
            storage = %config.storage.db_type,
            notary = %notary.identity(),
            "case node started"
        );

        Ok(Self {
            party,
            identity,
            vault,
            coordinator,
            network,
            responder_task,
        })
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn identity(&self) -> &dyn IdentityFacade {
        self.identity.as_ref()
    }

    pub fn coordinator(&self) -> &SigningCoordinator {
        &self.coordinator
    }

    /// Open a case about `subject` with `investigator`. Blocks until the
    /// notary accepts or the run fails.
    pub async fn open_case(
        &self,
        subject: &str,
        investigator: &Party,
    ) -> Result<TransitionId, FlowError> {
        self.open_case_cancellable(subject, investigator, &CancelToken::never())
            .await
    }

    pub async fn open_case_cancellable(
        &self,
        subject: &str,
        investigator: &Party,
        cancel: &CancelToken,
    ) -> Result<TransitionId, FlowError> {
        let tx = self
            .coordinator
            .open_case(subject, investigator, cancel)
            .await?;
        Ok(*tx.id())
    }

    /// Hand a case this node investigates to `new_investigator`.
    pub async fn transfer_case(
        &self,
        case_id: &CaseId,
        new_investigator: &Party,
    ) -> Result<TransitionId, FlowError> {
        self.transfer_case_cancellable(case_id, new_investigator, &CancelToken::never())
            .await
    }

    pub async fn transfer_case_cancellable(
        &self,
        case_id: &CaseId,
        new_investigator: &Party,
        cancel: &CancelToken,
    ) -> Result<TransitionId, FlowError> {
        let tx = self
            .coordinator
            .transfer_case(case_id, new_investigator, cancel)
            .await?;
        Ok(*tx.id())
    }

    /// The party behind a pseudonym, if it was ever disclosed to this node.
    pub fn resolve(&self, pseudonym: &AnonymousParty) -> Option<Party> {
        self.identity.resolve(pseudonym)
    }

    /// The live version of a case, as far as this node knows.
    pub fn live_case(&self, case_id: &CaseId) -> Result<Option<CaseRecord>, FlowError> {
        let mut live = self.vault.find_live_by_case_id(case_id)?;
        match live.len() {
            0 => Ok(None),
            1 => Ok(live.remove(0).state.as_case().cloned()),
            n => Err(FlowError::AmbiguousState {
                case_id: *case_id,
                live: n,
            }),
        }
    }

    /// Every live case this node takes part in.
    pub fn live_cases(&self) -> Result<Vec<CaseRecord>, FlowError> {
        Ok(self
            .vault
            .live_records()?
            .into_iter()
            .filter_map(|s| s.state.as_case().cloned())
            .collect())
    }

    /// Every version of a case this node has recorded, oldest first.
    pub fn lineage(&self, case_id: &CaseId) -> Result<Vec<VaultEntry>, FlowError> {
        Ok(self.vault.lineage(case_id)?)
    }
}

/// Dropping a node takes it off the network.
impl Drop for CaseNode {
    fn drop(&mut self) {
        self.network.deregister(&self.party);
        self.responder_task.abort();
        debug!(party = %self.party, "case node stopped");
    }
}

async fn serve(responder: Arc<Responder>, mut inbound: mpsc::Receiver<Session>, party: Party) {
    while let Some(session) = inbound.recv().await {
        let responder = responder.clone();
        let party = party.clone();
        tokio::spawn(async move {
            let peer = session.peer().clone();
            match responder.handle(session).await {
                Ok(ResponderOutcome::Recorded(id)) => debug!(
                    party = %party,
                    peer = %peer,
                    tx = %short_hex(&id),
                    "session recorded transition"
                ),
                Ok(ResponderOutcome::Declined(reason)) => {
                    info!(party = %party, peer = %peer, reason = %reason, "session declined")
                }
                Ok(ResponderOutcome::Abandoned(reason)) => info!(
                    party = %party,
                    peer = %peer,
                    reason = %reason,
                    "initiator abandoned the session"
                ),
                Err(e) => warn!(party = %party, peer = %peer, error = %e, "inbound session failed"),
            }
        });
    }
}
