//! Shared type definitions for the casework ledger.
//!
//! Durable and pseudonymous identities, case records, transition proposals
//! and their signed/notarised forms, and the session messages exchanged
//! while collecting signatures.

pub mod case;
pub mod constants;
pub mod error;
pub mod identity;
pub mod network;
pub mod primitives;
pub mod transition;
