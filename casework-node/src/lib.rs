//! A party's node on the casework ledger.
//!
//! [`node::CaseNode`] wires an identity wallet, a vault, the signing
//! coordinator, and a background responder onto a shared network and
//! notary, and exposes the two user operations: open a case and transfer it.

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
