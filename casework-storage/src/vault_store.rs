use std::sync::Mutex;

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, error, warn};

use casework_types::case::{CaseRecord, LedgerState, RecordRef, StateAndRef};
use casework_types::primitives::{short_hex, CaseId, TransitionId};
use casework_types::transition::NotarisedTransition;

use crate::error::StorageError;
use crate::traits::{BatchOp, BatchWriter};

const TX_PREFIX: &[u8] = b"vault:tx:";
const CASE_PREFIX: &[u8] = b"vault:case:";
const REF_PREFIX: &[u8] = b"vault:ref:";
const SEQ_KEY: &[u8] = b"vault:seq";

/// One recorded version of a case.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VaultEntry {
    pub record: CaseRecord,
    pub reference: RecordRef,
    /// The transition that consumed this version, if any.
    pub consumed_by: Option<TransitionId>,
}

impl VaultEntry {
    pub fn is_live(&self) -> bool {
        self.consumed_by.is_none()
    }

    pub fn to_state_and_ref(&self) -> StateAndRef {
        StateAndRef {
            state: LedgerState::Case(self.record.clone()),
            reference: self.reference,
        }
    }
}

/// The query side of a party's ledger.
pub trait Vault: Send + Sync {
    /// Every unconsumed version recorded under `case_id`. More than one is a
    /// corrupt ledger; the caller decides how to fail.
    fn find_live_by_case_id(&self, case_id: &CaseId) -> Result<Vec<StateAndRef>, StorageError>;

    /// Record a transition accepted by the notary. Inputs are marked consumed;
    /// outputs are stored only where `is_relevant` says the node takes part.
    fn record_accepted(
        &self,
        tx: &NotarisedTransition,
        is_relevant: &dyn Fn(&CaseRecord) -> bool,
    ) -> Result<(), StorageError>;

    /// Every unconsumed version held.
    fn live_records(&self) -> Result<Vec<StateAndRef>, StorageError>;

    /// All recorded versions of a case, oldest first.
    fn lineage(&self, case_id: &CaseId) -> Result<Vec<VaultEntry>, StorageError>;

    /// A recorded transition by ID.
    fn transition(&self, id: &TransitionId) -> Result<Option<NotarisedTransition>, StorageError>;
}

/// [`Vault`] over any batch-capable key-value store.
///
/// Case entries are keyed by `case_id` followed by a vault-wide sequence
/// number, so a prefix scan returns a case's versions in recording order.
pub struct VaultStore<S: BatchWriter> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: BatchWriter> VaultStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn case_prefix(case_id: &CaseId) -> Vec<u8> {
        let mut key = Vec::with_capacity(CASE_PREFIX.len() + 16);
        key.extend_from_slice(CASE_PREFIX);
        key.extend_from_slice(case_id.as_bytes());
        key
    }

    fn case_key(case_id: &CaseId, seq: u64) -> Vec<u8> {
        let mut key = Self::case_prefix(case_id);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn ref_key(reference: &RecordRef) -> Vec<u8> {
        let mut key = Vec::with_capacity(REF_PREFIX.len() + 36);
        key.extend_from_slice(REF_PREFIX);
        key.extend_from_slice(&reference.transition_id);
        key.extend_from_slice(&reference.index.to_be_bytes());
        key
    }

    fn tx_key(id: &TransitionId) -> Vec<u8> {
        let mut key = Vec::with_capacity(TX_PREFIX.len() + 32);
        key.extend_from_slice(TX_PREFIX);
        key.extend_from_slice(id);
        key
    }

    fn next_seq(&self) -> Result<u64, StorageError> {
        match self.store.get(SEQ_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| StorageError::Corrupt {
                    reason: "sequence counter is not 8 bytes".to_string(),
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn scan_entries(&self, prefix: &[u8]) -> Result<Vec<VaultEntry>, StorageError> {
        self.store
            .prefix_scan(prefix)?
            .into_iter()
            .map(|(_, bytes)| decode::<VaultEntry>(&bytes))
            .collect()
    }
}

fn encode<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    borsh::to_vec(value).map_err(|e| StorageError::SerializationError {
        reason: e.to_string(),
    })
}

fn decode<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, StorageError> {
    T::try_from_slice(bytes).map_err(|e| StorageError::DeserializationError {
        reason: e.to_string(),
    })
}

impl<S: BatchWriter> Vault for VaultStore<S> {
    fn find_live_by_case_id(&self, case_id: &CaseId) -> Result<Vec<StateAndRef>, StorageError> {
        Ok(self
            .scan_entries(&Self::case_prefix(case_id))?
            .iter()
            .filter(|entry| entry.is_live())
            .map(VaultEntry::to_state_and_ref)
            .collect())
    }

    fn record_accepted(
        &self,
        tx: &NotarisedTransition,
        is_relevant: &dyn Fn(&CaseRecord) -> bool,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|e| StorageError::WriteError {
            reason: format!("vault write lock poisoned: {e}"),
        })?;

        let tx_key = Self::tx_key(tx.id());
        if self.store.exists(&tx_key)? {
            debug!(tx = %short_hex(tx.id()), "transition already recorded");
            return Ok(());
        }

        let mut ops = Vec::new();

        for input in &tx.proposal().consumed {
            let Some(case_key) = self.store.get(&Self::ref_key(&input.reference))? else {
                continue;
            };
            let Some(bytes) = self.store.get(&case_key)? else {
                warn!(reference = %input.reference, "reference index points at a missing entry");
                continue;
            };
            let mut entry: VaultEntry = decode(&bytes)?;
            if let Some(spender) = entry.consumed_by.filter(|id| id != tx.id()) {
                error!(
                    reference = %input.reference,
                    consumed_by = %short_hex(&spender),
                    tx = %short_hex(tx.id()),
                    "transition consumes an input already spent by another transition"
                );
                return Err(StorageError::Corrupt {
                    reason: format!(
                        "input {} already consumed by transition {}",
                        input.reference,
                        short_hex(&spender)
                    ),
                });
            }
            entry.consumed_by = Some(*tx.id());
            ops.push(BatchOp::Put {
                key: case_key,
                value: encode(&entry)?,
            });
        }

        let mut seq = self.next_seq()?;
        for (index, output) in tx.proposal().produced.iter().enumerate() {
            let Some(record) = output.as_case() else {
                continue;
            };
            if !is_relevant(record) {
                continue;
            }
            let reference = RecordRef {
                transition_id: *tx.id(),
                index: index as u32,
            };
            let entry = VaultEntry {
                record: record.clone(),
                reference,
                consumed_by: None,
            };
            let case_key = Self::case_key(&record.case_id, seq);
            seq += 1;
            ops.push(BatchOp::Put {
                key: Self::ref_key(&reference),
                value: case_key.clone(),
            });
            ops.push(BatchOp::Put {
                key: case_key,
                value: encode(&entry)?,
            });
        }

        ops.push(BatchOp::Put {
            key: SEQ_KEY.to_vec(),
            value: seq.to_be_bytes().to_vec(),
        });
        ops.push(BatchOp::Put {
            key: tx_key,
            value: encode(tx)?,
        });
        self.store.write_batch(ops)?;

        debug!(tx = %short_hex(tx.id()), "recorded transition");
        Ok(())
    }

    fn live_records(&self) -> Result<Vec<StateAndRef>, StorageError> {
        Ok(self
            .scan_entries(CASE_PREFIX)?
            .iter()
            .filter(|entry| entry.is_live())
            .map(VaultEntry::to_state_and_ref)
            .collect())
    }

    fn lineage(&self, case_id: &CaseId) -> Result<Vec<VaultEntry>, StorageError> {
        self.scan_entries(&Self::case_prefix(case_id))
    }

    fn transition(&self, id: &TransitionId) -> Result<Option<NotarisedTransition>, StorageError> {
        self.store
            .get(&Self::tx_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}
