//! Prescriptions and their immutable line items.
//!
//! The catalog owns prescription records. Clinical content (the items) is
//! immutable after creation; the only mutable fields are the status and each
//! item's running dispensed tally, both of which change exclusively under the
//! prescription's own lock during a dispense commit or an administrative
//! cancel.

use crate::schedule;
use crate::shared::{read_lock, write_lock};
use crate::{DispenseError, DispenseResult};
use chrono::{DateTime, NaiveDate, Utc};
use rx_id::{EntityId, RxNumber, RxNumberSequence};
use rx_types::{NonEmptyText, Quantity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Prescription lifecycle status.
///
/// `Active` means untouched; `PartiallyDispensed` means at least one dispense
/// has happened but some item still has quantity remaining. `Completed` and
/// `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    PartiallyDispensed,
    Completed,
    Cancelled,
}

impl PrescriptionStatus {
    /// True for the states a dispense may start from.
    pub fn is_dispensable(&self) -> bool {
        matches!(self, Self::Active | Self::PartiallyDispensed)
    }

    /// True for the states no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::PartiallyDispensed => "partially_dispensed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// One medication line within a prescription.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionItem {
    pub id: EntityId,
    pub prescription_id: EntityId,
    pub medication_id: EntityId,
    pub dosage: NonEmptyText,
    pub frequency: NonEmptyText,
    /// Total prescribed amount; the ceiling for cumulative dispensing.
    pub quantity: Quantity,
    pub duration_days: Option<u32>,
    pub instructions: Option<String>,
    /// Running tally of units dispensed so far. Bookkeeping maintained by the
    /// dispense commit; the authoritative history is the audit trail.
    pub dispensed_total: u32,
}

impl PrescriptionItem {
    /// Units still allowed to be dispensed against this item.
    pub fn remaining(&self) -> u32 {
        self.quantity.get().saturating_sub(self.dispensed_total)
    }

    pub fn is_fully_dispensed(&self) -> bool {
        self.remaining() == 0
    }
}

/// A prescription: the authorisation header plus its line items.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: EntityId,
    pub number: RxNumber,
    pub patient_id: EntityId,
    pub facility_id: EntityId,
    pub prescriber_id: EntityId,
    pub start_date: NaiveDate,
    /// Derived once at creation from the longest item duration; never
    /// recomputed afterwards.
    pub end_date: Option<NaiveDate>,
    pub status: PrescriptionStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<PrescriptionItem>,
}

impl Prescription {
    /// Looks up an item by id. The ids handed out at creation are the only
    /// valid references; callers must not map medications to item ids
    /// themselves.
    pub fn item(&self, item_id: EntityId) -> Option<&PrescriptionItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn all_items_fully_dispensed(&self) -> bool {
        self.items.iter().all(PrescriptionItem::is_fully_dispensed)
    }
}

/// Input for one prescription line.
#[derive(Clone, Debug, Deserialize)]
pub struct NewPrescriptionItem {
    pub medication_id: EntityId,
    pub dosage: String,
    pub frequency: String,
    pub quantity: u32,
    pub duration_days: Option<u32>,
    pub instructions: Option<String>,
}

/// Input for creating a prescription.
#[derive(Clone, Debug, Deserialize)]
pub struct NewPrescription {
    pub patient_id: EntityId,
    pub facility_id: EntityId,
    pub prescriber_id: EntityId,
    pub start_date: NaiveDate,
    pub notes: Option<String>,
    pub items: Vec<NewPrescriptionItem>,
}

pub(crate) type PrescriptionHandle = Arc<Mutex<Prescription>>;

/// Locks a prescription handle, recovering from a poisoned mutex.
pub(crate) fn lock_prescription(handle: &Mutex<Prescription>) -> MutexGuard<'_, Prescription> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owner of all prescriptions.
#[derive(Debug)]
pub struct PrescriptionCatalog {
    prescriptions: RwLock<BTreeMap<EntityId, PrescriptionHandle>>,
    sequence: RxNumberSequence,
}

impl Default for PrescriptionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PrescriptionCatalog {
    pub fn new() -> Self {
        Self {
            prescriptions: RwLock::new(BTreeMap::new()),
            sequence: RxNumberSequence::default(),
        }
    }

    /// Creates a prescription from validated input.
    ///
    /// Validation covers shape only (at least one item; dosage, frequency
    /// present; quantity at least 1). Cross-registry checks (patient exists,
    /// medications known) belong to the service layer, which runs them before
    /// calling in here.
    ///
    /// The end date is derived here, before the record is stored, and never
    /// recomputed afterwards.
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::Validation` describing the first offending
    /// item.
    pub fn create(&self, input: NewPrescription) -> DispenseResult<Prescription> {
        if input.items.is_empty() {
            return Err(DispenseError::Validation(
                "a prescription needs at least one item".into(),
            ));
        }

        let prescription_id = EntityId::new();

        let mut items = Vec::with_capacity(input.items.len());
        for (index, item) in input.items.into_iter().enumerate() {
            let dosage = NonEmptyText::new(&item.dosage).map_err(|_| {
                DispenseError::Validation(format!("item {index}: dosage cannot be empty"))
            })?;
            let frequency = NonEmptyText::new(&item.frequency).map_err(|_| {
                DispenseError::Validation(format!("item {index}: frequency cannot be empty"))
            })?;
            let quantity = Quantity::new(item.quantity).map_err(|_| {
                DispenseError::Validation(format!("item {index}: quantity must be at least 1"))
            })?;

            items.push(PrescriptionItem {
                id: EntityId::new(),
                prescription_id,
                medication_id: item.medication_id,
                dosage,
                frequency,
                quantity,
                duration_days: item.duration_days,
                instructions: item.instructions,
                dispensed_total: 0,
            });
        }

        let durations: Vec<Option<u32>> = items.iter().map(|i| i.duration_days).collect();
        let end_date = schedule::end_date(input.start_date, &durations);

        let prescription = Prescription {
            id: prescription_id,
            number: self.sequence.allocate(),
            patient_id: input.patient_id,
            facility_id: input.facility_id,
            prescriber_id: input.prescriber_id,
            start_date: input.start_date,
            end_date,
            status: PrescriptionStatus::Active,
            notes: input.notes,
            created_at: Utc::now(),
            items,
        };

        write_lock(&self.prescriptions)
            .insert(prescription.id, Arc::new(Mutex::new(prescription.clone())));

        tracing::info!(
            prescription = %prescription.number,
            items = prescription.items.len(),
            "prescription created"
        );

        Ok(prescription)
    }

    /// Returns a snapshot of the prescription with its items.
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::NotFound` for an unknown id.
    pub fn get(&self, id: EntityId) -> DispenseResult<Prescription> {
        let handle = self.handle(id)?;
        let prescription = lock_prescription(&handle);
        Ok(prescription.clone())
    }

    /// Returns the shared handle used by the dispense commit.
    pub(crate) fn handle(&self, id: EntityId) -> DispenseResult<PrescriptionHandle> {
        read_lock(&self.prescriptions)
            .get(&id)
            .cloned()
            .ok_or(DispenseError::NotFound {
                entity: "prescription",
                id: id.to_string(),
            })
    }

    /// All prescriptions for one patient, in id order.
    pub fn list_for_patient(&self, patient_id: EntityId) -> Vec<Prescription> {
        read_lock(&self.prescriptions)
            .values()
            .filter_map(|handle| {
                let prescription = lock_prescription(handle);
                (prescription.patient_id == patient_id).then(|| prescription.clone())
            })
            .collect()
    }

    /// Administrative cancellation.
    ///
    /// Allowed from `Active` and `PartiallyDispensed`; terminal states are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// - `DispenseError::NotFound` for an unknown id.
    /// - `DispenseError::Transition` when the prescription is already
    ///   terminal.
    pub fn cancel(&self, id: EntityId) -> DispenseResult<Prescription> {
        let handle = self.handle(id)?;
        let mut prescription = lock_prescription(&handle);

        if prescription.status.is_terminal() {
            return Err(DispenseError::Transition {
                prescription_id: id,
                status: prescription.status,
            });
        }

        prescription.status = PrescriptionStatus::Cancelled;
        tracing::info!(prescription = %prescription.number, "prescription cancelled");
        Ok(prescription.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_input() -> NewPrescription {
        NewPrescription {
            patient_id: EntityId::new(),
            facility_id: EntityId::new(),
            prescriber_id: EntityId::new(),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            notes: None,
            items: vec![
                NewPrescriptionItem {
                    medication_id: EntityId::new(),
                    dosage: "1 tablet".into(),
                    frequency: "once daily".into(),
                    quantity: 30,
                    duration_days: Some(30),
                    instructions: None,
                },
                NewPrescriptionItem {
                    medication_id: EntityId::new(),
                    dosage: "2 tablets".into(),
                    frequency: "twice daily".into(),
                    quantity: 20,
                    duration_days: Some(10),
                    instructions: Some("after meals".into()),
                },
            ],
        }
    }

    #[test]
    fn create_derives_end_date_from_longest_duration() {
        let catalog = PrescriptionCatalog::new();
        let prescription = catalog.create(valid_input()).unwrap();

        assert_eq!(
            prescription.end_date,
            Some(NaiveDate::from_ymd_opt(2025, 1, 31).unwrap())
        );
        assert_eq!(prescription.status, PrescriptionStatus::Active);
    }

    #[test]
    fn create_without_durations_leaves_end_date_unset() {
        let catalog = PrescriptionCatalog::new();
        let mut input = valid_input();
        for item in &mut input.items {
            item.duration_days = None;
        }

        let prescription = catalog.create(input).unwrap();
        assert_eq!(prescription.end_date, None);
    }

    #[test]
    fn create_rejects_empty_item_list() {
        let catalog = PrescriptionCatalog::new();
        let mut input = valid_input();
        input.items.clear();

        let err = catalog.create(input).expect_err("no items");
        assert!(matches!(err, DispenseError::Validation(_)));
    }

    #[test]
    fn create_rejects_blank_dosage_and_zero_quantity() {
        let catalog = PrescriptionCatalog::new();

        let mut input = valid_input();
        input.items[0].dosage = "  ".into();
        assert!(matches!(
            catalog.create(input),
            Err(DispenseError::Validation(_))
        ));

        let mut input = valid_input();
        input.items[1].quantity = 0;
        let err = catalog.create(input).expect_err("zero quantity");
        match err {
            DispenseError::Validation(msg) => assert!(msg.contains("item 1")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn prescription_numbers_are_sequential() {
        let catalog = PrescriptionCatalog::new();
        let first = catalog.create(valid_input()).unwrap();
        let second = catalog.create(valid_input()).unwrap();

        assert_eq!(first.number.to_string(), "RX-000001");
        assert_eq!(second.number.to_string(), "RX-000002");
    }

    #[test]
    fn get_returns_stable_item_ids() {
        let catalog = PrescriptionCatalog::new();
        let created = catalog.create(valid_input()).unwrap();

        let fetched = catalog.get(created.id).unwrap();
        let created_ids: Vec<_> = created.items.iter().map(|i| i.id).collect();
        let fetched_ids: Vec<_> = fetched.items.iter().map(|i| i.id).collect();

        assert_eq!(created_ids, fetched_ids);
    }

    #[test]
    fn cancel_is_terminal() {
        let catalog = PrescriptionCatalog::new();
        let created = catalog.create(valid_input()).unwrap();

        let cancelled = catalog.cancel(created.id).unwrap();
        assert_eq!(cancelled.status, PrescriptionStatus::Cancelled);

        let err = catalog.cancel(created.id).expect_err("already terminal");
        match err {
            DispenseError::Transition { status, .. } => {
                assert_eq!(status, PrescriptionStatus::Cancelled);
            }
            other => panic!("expected Transition, got {other:?}"),
        }
    }

    #[test]
    fn list_for_patient_filters_by_patient() {
        let catalog = PrescriptionCatalog::new();
        let mine = catalog.create(valid_input()).unwrap();
        catalog.create(valid_input()).unwrap();

        let listed = catalog.list_for_patient(mine.patient_id);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);
    }

    #[test]
    fn status_dispensability() {
        assert!(PrescriptionStatus::Active.is_dispensable());
        assert!(PrescriptionStatus::PartiallyDispensed.is_dispensable());
        assert!(!PrescriptionStatus::Completed.is_dispensable());
        assert!(!PrescriptionStatus::Cancelled.is_dispensable());
    }

    #[test]
    fn serialises_status_in_snake_case() {
        let json = serde_json::to_string(&PrescriptionStatus::PartiallyDispensed).unwrap();
        assert_eq!(json, "\"partially_dispensed\"");
    }
}
