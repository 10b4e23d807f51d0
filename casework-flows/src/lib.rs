//! The multi-party side of the casework ledger.
//!
//! - [`identity`]: pseudonym minting, certificates, and scoped resolution.
//! - [`session`], [`codec`], [`network`]: ordered point-to-point sessions
//!   between parties and an in-process network to carry them.
//! - [`assembler`]: turns a caller's intent into a transition proposal.
//! - [`coordinator`]: drives a proposal through signing and finality.
//! - [`responder`]: the counterparty side that decides whether to co-sign.

pub mod assembler;
pub mod cancel;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod network;
pub mod progress;
pub mod responder;
pub mod session;
