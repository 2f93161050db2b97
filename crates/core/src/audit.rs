//! Append-only dispense history.
//!
//! Every committed dispense lands here as one transaction header with its
//! lines. Entries are never updated or deleted; together with a record's
//! initial stock level they are sufficient to reconstruct the full
//! `quantity_on_hand` history of any inventory record by replay.

use crate::{DispenseError, DispenseResult};
use chrono::{DateTime, Utc};
use rx_id::EntityId;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One dispensed line: provenance for a single prescription item.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispenseLine {
    pub dispense_transaction_id: EntityId,
    pub prescription_item_id: EntityId,
    pub inventory_record_id: EntityId,
    pub quantity_dispensed: u32,
    pub batch_number: Option<String>,
    pub notes: Option<String>,
}

/// The atomic unit covering one or more items dispensed together.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispenseTransaction {
    pub id: EntityId,
    pub prescription_id: EntityId,
    pub nurse_id: EntityId,
    pub facility_id: EntityId,
    pub dispensed_at: DateTime<Utc>,
    pub lines: Vec<DispenseLine>,
}

/// Append-only store of dispense transactions.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<DispenseTransaction>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one committed transaction.
    pub fn append(&self, transaction: DispenseTransaction) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(transaction);
    }

    /// All transactions ordered by dispense time.
    pub fn ordered(&self) -> Vec<DispenseTransaction> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = entries.clone();
        out.sort_by_key(|tx| tx.dispensed_at);
        out
    }

    /// Reconstructs the `quantity_on_hand` history of one inventory record.
    ///
    /// Starting from `initial_level`, returns the stock level after each
    /// transaction that touched the record, in dispense-time order.
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::Validation` if the recorded deductions would
    /// drive the level negative, which indicates the supplied initial level
    /// does not belong to this record's history.
    pub fn replay_levels(
        &self,
        inventory_record_id: EntityId,
        initial_level: u32,
    ) -> DispenseResult<Vec<u32>> {
        let mut level = initial_level;
        let mut history = Vec::new();

        for transaction in self.ordered() {
            let deducted: u32 = transaction
                .lines
                .iter()
                .filter(|line| line.inventory_record_id == inventory_record_id)
                .map(|line| line.quantity_dispensed)
                .sum();

            if deducted == 0 {
                continue;
            }

            level = level.checked_sub(deducted).ok_or_else(|| {
                DispenseError::Validation(format!(
                    "replay of record {inventory_record_id} under-runs at transaction {}",
                    transaction.id
                ))
            })?;
            history.push(level);
        }

        Ok(history)
    }
}
