use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use casework_types::constants::INBOUND_SESSION_CAPACITY;
use casework_types::identity::{IdentityCertificate, Party};
use casework_types::primitives::PublicKey;

use crate::error::FlowError;
use crate::identity::{IdentityError, IdentityExchange, IdentityWallet};
use crate::session::{Session, SessionTransport};

struct Endpoint {
    party: Party,
    inbound: mpsc::Sender<Session>,
    wallet: Arc<IdentityWallet>,
}

/// In-process network connecting nodes that share a runtime.
///
/// Each registered party gets a queue of inbound sessions. Sessions are
/// addressed by well-known key and carry the opener's identity, so a
/// responder always knows who it is talking to.
#[derive(Default)]
pub struct InMemoryNetwork {
    endpoints: RwLock<HashMap<PublicKey, Endpoint>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Returns the receiver its responder loop drains.
    pub fn register(&self, wallet: Arc<IdentityWallet>) -> mpsc::Receiver<Session> {
        let (tx, rx) = mpsc::channel(INBOUND_SESSION_CAPACITY);
        let party = wallet.party().clone();
        info!(party = %party, "joined network");
        self.endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                party.owning_key,
                Endpoint {
                    party,
                    inbound: tx,
                    wallet,
                },
            );
        rx
    }

    /// Detach a node. Sessions already open stay open.
    pub fn deregister(&self, party: &Party) {
        if self
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&party.owning_key)
            .is_some()
        {
            info!(party = %party, "left network");
        }
    }

    /// Every registered party, ordered by name.
    pub fn parties(&self) -> Vec<Party> {
        let mut parties: Vec<Party> = self
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|e| e.party.clone())
            .collect();
        parties.sort_by(|a, b| a.name.cmp(&b.name));
        parties
    }

    fn inbound_for(&self, to: &Party) -> Option<mpsc::Sender<Session>> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&to.owning_key)
            .filter(|e| e.party == *to)
            .map(|e| e.inbound.clone())
    }

    fn wallet_for(&self, owner: &Party) -> Option<Arc<IdentityWallet>> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&owner.owning_key)
            .filter(|e| e.party == *owner)
            .map(|e| e.wallet.clone())
    }
}

#[async_trait]
impl SessionTransport for InMemoryNetwork {
    async fn open_session(&self, from: &Party, to: &Party) -> Result<Session, FlowError> {
        let inbound = self
            .inbound_for(to)
            .ok_or_else(|| FlowError::transport(format!("{to} is not reachable")))?;
        let (ours, theirs) = Session::pair(from.clone(), to.clone());
        inbound
            .send(theirs)
            .await
            .map_err(|_| FlowError::transport(format!("{to} is not accepting sessions")))?;
        debug!(from = %from, to = %to, "session opened");
        Ok(ours)
    }
}

#[async_trait]
impl IdentityExchange for InMemoryNetwork {
    async fn mint_remote(
        &self,
        owner: &Party,
        disclose: Option<IdentityCertificate>,
    ) -> Result<IdentityCertificate, IdentityError> {
        let wallet = self
            .wallet_for(owner)
            .ok_or_else(|| IdentityError::UnknownParty(owner.name.clone()))?;
        if let Some(certificate) = disclose {
            wallet.learn(certificate)?;
        }
        wallet.mint()
    }
}
