// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Trustline Protocol: Core Library
//!
//! The primitives a trustline currency network is built from. Nothing in
//! here knows what a payment path is; that lives in `trustline-contracts`.
//! What lives here is everything a ledger has to get exactly right before
//! it can even start: arithmetic that refuses to wrap, addresses, signatures
//! that name their signer, a clock tests can hold still, and the byte layout
//! of a trustline at rest.
//!
//! ## Architecture
//!
//! - **math**: Checked arithmetic. Overflow is an error, never a wrap.
//! - **identity**: Participant addresses and insertion-ordered sets of them.
//! - **crypto**: Keccak-256, secp256k1 keys, signer recovery.
//! - **config**: Constants and the per-network `NetworkConfig`.
//! - **clock**: Injected time source.
//! - **logging**: `tracing` subscriber bootstrap for hosts and tests.
//! - **storage**: Trustline record codec and the store contract.
//!
//! ## Design Philosophy
//!
//! 1. Integer money. No floats anywhere near a balance.
//! 2. Every fallible operation returns a typed error.
//! 3. If it touches money, it has tests. Plural.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod logging;
pub mod math;
pub mod storage;
