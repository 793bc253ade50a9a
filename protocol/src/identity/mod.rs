//! # Identity Module
//!
//! Who is on the network, and in what order they showed up.
//!
//! 1. **ParticipantId**: 20-byte address derived from a secp256k1 public
//!    key. This is what trustlines, paths and signatures refer to.
//! 2. **IdentitySet**: insertion-ordered set of participants. The network
//!    keeps one for its user list and one per participant for their
//!    counterparties, so enumeration reflects registration history rather
//!    than hash order.

pub mod participant;
pub mod set;

pub use participant::{IdentityError, ParticipantId};
pub use set::IdentitySet;
