//! Finality service for the casework ledger.
//!
//! The notary is the only component that orders transitions globally: it
//! refuses any transition whose inputs were already consumed, and its
//! signature is the point of commit.

pub mod error;
pub mod notary;
