use std::fmt;
use std::sync::Mutex;

use casework_types::primitives::{short_hex, TransitionId};

/// Where a signing run currently is. Steps only move forward; `Failed` is
/// reachable from any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolStep {
    BuildProposal,
    LocalValidate,
    LocalSign,
    /// Transfer only.
    SyncIdentities,
    CollectCounterpartySignatures,
    Finalize,
    Done,
    Failed(String),
}

impl ProtocolStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolStep::Done | ProtocolStep::Failed(_))
    }
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolStep::BuildProposal => f.write_str("build-proposal"),
            ProtocolStep::LocalValidate => f.write_str("local-validate"),
            ProtocolStep::LocalSign => f.write_str("local-sign"),
            ProtocolStep::SyncIdentities => f.write_str("sync-identities"),
            ProtocolStep::CollectCounterpartySignatures => f.write_str("collect-signatures"),
            ProtocolStep::Finalize => f.write_str("finalize"),
            ProtocolStep::Done => f.write_str("done"),
            ProtocolStep::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Observability hook for step changes. Has no say over the run.
pub trait ProgressObserver: Send + Sync {
    /// `tx` is `None` until the proposal has been built.
    fn on_step(&self, tx: Option<&TransitionId>, step: &ProtocolStep);
}

/// Keeps every reported step in order.
#[derive(Debug, Default)]
pub struct StepLog {
    steps: Mutex<Vec<ProtocolStep>>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<ProtocolStep> {
        self.steps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

impl ProgressObserver for StepLog {
    fn on_step(&self, tx: Option<&TransitionId>, step: &ProtocolStep) {
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = tx {
            tracing::trace!(tx = %short_hex(id), step = %step, "step recorded");
        }
        steps.push(step.clone());
    }
}
