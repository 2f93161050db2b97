//! Per-facility medication inventory.
//!
//! Every inventory record sits behind its own mutex; the collection itself is
//! a read-mostly map from record id to the shared handle, with a unique index
//! over the `(facility, medication)` pair. All mutation goes through
//! [`InventoryLedger::deduct`] and [`InventoryLedger::restock`], which
//! re-check their guard condition *inside* the record's critical section.
//! An earlier read of `quantity_on_hand` is advisory only and never the basis
//! for a write.
//!
//! Multi-record operations (the dispense commit) take the handles out of the
//! map and lock them in ascending record-id order; see `dispense.rs`.

use crate::shared::{read_lock, write_lock};
use crate::{CoreConfig, DispenseError, DispenseResult};
use chrono::{NaiveDate, Utc};
use rx_id::EntityId;
use rx_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// A per-facility, per-medication stock record.
///
/// Only `quantity_on_hand` ever changes after creation, and only through the
/// ledger while the record's own lock is held.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InventoryRecord {
    pub id: EntityId,
    pub facility_id: EntityId,
    pub medication_id: EntityId,
    pub quantity_on_hand: u32,
    pub reorder_level: u32,
    pub unit: String,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub supplier: Option<String>,
    pub cost_per_unit: Option<f64>,
}

impl InventoryRecord {
    /// Stock at or below the reorder threshold counts as low.
    pub fn is_low(&self) -> bool {
        self.quantity_on_hand <= self.reorder_level
    }

    /// True when the expiry date falls within the warning horizon of `today`.
    /// Already-expired stock also reports true.
    pub fn is_expiring_soon(&self, today: NaiveDate, warning_days: i64) -> bool {
        match self.expiry_date {
            Some(expiry) => expiry.signed_duration_since(today).num_days() < warning_days,
            None => false,
        }
    }
}

/// Input for registering a stock record.
#[derive(Clone, Debug, Deserialize)]
pub struct NewInventoryRecord {
    pub facility_id: EntityId,
    pub medication_id: EntityId,
    pub quantity_on_hand: u32,
    pub reorder_level: u32,
    pub unit: String,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub supplier: Option<String>,
    pub cost_per_unit: Option<f64>,
}

/// Read model for one facility/medication stock position.
///
/// When no record exists the result is a synthetic zero (not an error): the
/// UI renders "0 / N/A" for unstocked medications. `is_low` and
/// `is_expiring_soon` are derived on every read and never stored.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StockAvailability {
    pub record_id: Option<EntityId>,
    pub facility_id: EntityId,
    pub medication_id: EntityId,
    pub quantity_on_hand: u32,
    pub reorder_level: u32,
    pub unit: Option<String>,
    pub is_low: bool,
    pub is_expiring_soon: bool,
}

pub(crate) type RecordHandle = Arc<Mutex<InventoryRecord>>;

/// Locks a record handle, recovering the data from a poisoned mutex.
///
/// Commit code never unwinds while holding a record lock (all validation runs
/// before the first mutation), so a poisoned record still carries consistent
/// state.
pub(crate) fn lock_record(handle: &Mutex<InventoryRecord>) -> MutexGuard<'_, InventoryRecord> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owner of all stock records.
#[derive(Debug)]
pub struct InventoryLedger {
    records: RwLock<BTreeMap<EntityId, RecordHandle>>,
    /// Unique index over the immutable `(facility, medication)` pair; lets
    /// lookups resolve a record id without touching any record lock.
    by_pair: RwLock<BTreeMap<(EntityId, EntityId), EntityId>>,
    expiry_warning_days: i64,
}

impl InventoryLedger {
    pub fn new(cfg: &CoreConfig) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            by_pair: RwLock::new(BTreeMap::new()),
            expiry_warning_days: cfg.expiry_warning_days(),
        }
    }

    /// Registers a stock record for a facility/medication pair.
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::Validation` if the unit is blank or the pair
    /// already has a record (stock for a pair is a single row; intake goes
    /// through [`restock`](Self::restock)).
    pub fn add_record(&self, input: NewInventoryRecord) -> DispenseResult<InventoryRecord> {
        let unit = NonEmptyText::new(&input.unit)
            .map_err(|_| DispenseError::Validation("inventory unit cannot be empty".into()))?;

        let pair = (input.facility_id, input.medication_id);
        let mut by_pair = write_lock(&self.by_pair);
        if by_pair.contains_key(&pair) {
            return Err(DispenseError::Validation(format!(
                "facility {} already stocks medication {}",
                input.facility_id, input.medication_id
            )));
        }

        let record = InventoryRecord {
            id: EntityId::new(),
            facility_id: input.facility_id,
            medication_id: input.medication_id,
            quantity_on_hand: input.quantity_on_hand,
            reorder_level: input.reorder_level,
            unit: unit.as_str().to_owned(),
            batch_number: input.batch_number,
            expiry_date: input.expiry_date,
            supplier: input.supplier,
            cost_per_unit: input.cost_per_unit,
        };

        by_pair.insert(pair, record.id);
        write_lock(&self.records).insert(record.id, Arc::new(Mutex::new(record.clone())));
        Ok(record)
    }

    /// Returns the shared handle for a record id.
    pub(crate) fn handle(&self, record_id: EntityId) -> DispenseResult<RecordHandle> {
        read_lock(&self.records)
            .get(&record_id)
            .cloned()
            .ok_or(DispenseError::NotFound {
                entity: "inventory record",
                id: record_id.to_string(),
            })
    }

    /// Resolves the record for a facility/medication pair, if stocked.
    ///
    /// Pure index lookup: no record lock is taken, so this is safe to call
    /// while other records (or the target record) are locked elsewhere.
    pub(crate) fn find(
        &self,
        facility_id: EntityId,
        medication_id: EntityId,
    ) -> Option<(EntityId, RecordHandle)> {
        let record_id = *read_lock(&self.by_pair).get(&(facility_id, medication_id))?;
        let handle = read_lock(&self.records).get(&record_id).cloned()?;
        Some((record_id, handle))
    }

    /// Current stock position for a facility/medication pair, evaluated
    /// against today's date.
    pub fn availability(
        &self,
        facility_id: EntityId,
        medication_id: EntityId,
    ) -> StockAvailability {
        self.availability_at(facility_id, medication_id, Utc::now().date_naive())
    }

    /// Like [`availability`](Self::availability) with an explicit reference
    /// date for the expiry-warning derivation.
    pub fn availability_at(
        &self,
        facility_id: EntityId,
        medication_id: EntityId,
        today: NaiveDate,
    ) -> StockAvailability {
        match self.find(facility_id, medication_id) {
            Some((record_id, handle)) => {
                let record = lock_record(&handle);
                StockAvailability {
                    record_id: Some(record_id),
                    facility_id,
                    medication_id,
                    quantity_on_hand: record.quantity_on_hand,
                    reorder_level: record.reorder_level,
                    unit: Some(record.unit.clone()),
                    is_low: record.is_low(),
                    is_expiring_soon: record.is_expiring_soon(today, self.expiry_warning_days),
                }
            }
            None => StockAvailability {
                record_id: None,
                facility_id,
                medication_id,
                quantity_on_hand: 0,
                reorder_level: 0,
                unit: None,
                is_low: true,
                is_expiring_soon: false,
            },
        }
    }

    /// Atomically removes `quantity` units from a record.
    ///
    /// The stock check runs inside the record's critical section; callers
    /// must not rely on an earlier `availability` read.
    ///
    /// # Errors
    ///
    /// - `DispenseError::Validation` if `quantity` is zero.
    /// - `DispenseError::NotFound` for an unknown record id.
    /// - `DispenseError::InsufficientStock` if fewer than `quantity` units
    ///   are on hand; the record is left unchanged.
    ///
    /// # Returns
    ///
    /// The new `quantity_on_hand`.
    pub fn deduct(&self, record_id: EntityId, quantity: u32) -> DispenseResult<u32> {
        if quantity == 0 {
            return Err(DispenseError::Validation(
                "deduct quantity must be positive".into(),
            ));
        }

        let handle = self.handle(record_id)?;
        let mut record = lock_record(&handle);

        if record.quantity_on_hand < quantity {
            return Err(DispenseError::InsufficientStock {
                medication: record.medication_id.to_string(),
                requested: quantity,
                available: record.quantity_on_hand,
            });
        }

        record.quantity_on_hand -= quantity;
        Ok(record.quantity_on_hand)
    }

    /// Atomically adds `quantity` units to a record.
    ///
    /// # Errors
    ///
    /// - `DispenseError::Validation` if `quantity` is zero.
    /// - `DispenseError::NotFound` for an unknown record id.
    ///
    /// # Returns
    ///
    /// The new `quantity_on_hand`.
    pub fn restock(&self, record_id: EntityId, quantity: u32) -> DispenseResult<u32> {
        if quantity == 0 {
            return Err(DispenseError::Validation(
                "restock quantity must be at least 1".into(),
            ));
        }

        let handle = self.handle(record_id)?;
        let mut record = lock_record(&handle);

        record.quantity_on_hand = record.quantity_on_hand.saturating_add(quantity);
        Ok(record.quantity_on_hand)
    }

    /// Snapshot of one record.
    pub fn snapshot(&self, record_id: EntityId) -> DispenseResult<InventoryRecord> {
        let handle = self.handle(record_id)?;
        let record = lock_record(&handle);
        Ok(record.clone())
    }

    /// All records held by a facility, in record-id order.
    pub fn records_for_facility(&self, facility_id: EntityId) -> Vec<InventoryRecord> {
        let record_ids: Vec<EntityId> = read_lock(&self.by_pair)
            .iter()
            .filter(|((facility, _), _)| *facility == facility_id)
            .map(|(_, record_id)| *record_id)
            .collect();

        let records = read_lock(&self.records);
        let mut out: Vec<InventoryRecord> = record_ids
            .into_iter()
            .filter_map(|id| records.get(&id).map(|handle| lock_record(handle).clone()))
            .collect();
        out.sort_by_key(|record| record.id);
        out
    }
}
