//! # RX Core
//!
//! Core business logic for the rx dispensing and inventory system.
//!
//! This crate contains the authoritative dispensing engine behind the clinic
//! UI's prescription workflows:
//! - Prescription catalog with immutable line items and derived end dates
//! - Per-facility medication inventory with row-level locking
//! - The atomic multi-item dispense transaction
//! - Append-only audit trail of dispense events
//!
//! **No API concerns**: HTTP servers, OpenAPI schemas and API-key checks
//! belong in `api-rest` and `api-shared`.

pub mod audit;
pub mod config;
pub mod directory;
pub mod dispense;
pub mod error;
pub mod inventory;
pub mod medication;
pub mod prescription;
pub mod schedule;
pub mod service;
mod shared;

pub use config::CoreConfig;
pub use error::{DispenseError, DispenseResult};
pub use service::PharmacyService;
