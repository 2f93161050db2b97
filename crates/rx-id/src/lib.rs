//! Identifier types for the rx system.
//!
//! Every persisted entity (medication, prescription, prescription item,
//! inventory record, dispense transaction) is addressed by a *canonical*
//! identifier: **32 lowercase hexadecimal characters** (no hyphens).
//!
//! This crate provides:
//! - A small wrapper type ([`EntityId`]) that *guarantees* the canonical
//!   format once constructed.
//! - The human-readable prescription number ([`RxNumber`]) and its
//!   process-wide sequential allocator ([`RxNumberSequence`]).
//!
//! ## Canonical id form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Notes:
//! - This is the same value you would get from `Uuid::new_v4().simple().to_string()`.
//! - Canonical form is *required* for externally supplied identifiers (for
//!   example, from CLI/API inputs). Use [`EntityId::parse`] to validate an
//!   input string.
//! - Non-canonical values (uppercase, hyphenated, wrong length, non-hex) are
//!   rejected.
//!
//! ## Ordering
//! [`EntityId`] implements `Ord` over its canonical byte representation.
//! The dispense commit protocol relies on this: inventory-record locks are
//! always acquired in ascending id order, which rules out lock cycles
//! between concurrent multi-item dispenses.

mod service;

// Re-export public types
pub use service::{EntityId, RxNumber, RxNumberSequence, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;
