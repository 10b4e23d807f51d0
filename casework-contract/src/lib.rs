//! The case contract: which transitions are legal, and how proposals are
//! built, identified, and signed.
//!
//! Validation is a pure function of the proposal so that every party can
//! re-derive the same verdict independently.

pub mod builder;
pub mod error;
pub mod validation;
