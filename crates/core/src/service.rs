//! The service facade.
//!
//! [`PharmacyService`] wires the formulary, directory, ledger, catalog,
//! coordinator and audit trail together and exposes the operations the API
//! layer consumes. Cross-registry validation (does the patient exist? are the
//! medications known?) lives here, in front of the leaf components.

use crate::audit::{AuditTrail, DispenseTransaction};
use crate::directory::Directory;
use crate::dispense::{DispenseCoordinator, DispenseOutcome, DispenseRequest};
use crate::inventory::{InventoryLedger, InventoryRecord, NewInventoryRecord, StockAvailability};
use crate::medication::{Medication, MedicationFormulary, NewMedication};
use crate::prescription::{NewPrescription, Prescription, PrescriptionCatalog};
use crate::{CoreConfig, DispenseError, DispenseResult};
use rx_id::EntityId;
use std::sync::Arc;

/// Facade over the dispensing core.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct PharmacyService {
    formulary: Arc<MedicationFormulary>,
    directory: Arc<Directory>,
    ledger: Arc<InventoryLedger>,
    catalog: Arc<PrescriptionCatalog>,
    audit: Arc<AuditTrail>,
    coordinator: Arc<DispenseCoordinator>,
}

impl PharmacyService {
    pub fn new(cfg: &CoreConfig) -> Self {
        let formulary = Arc::new(MedicationFormulary::new());
        let directory = Arc::new(Directory::new());
        let ledger = Arc::new(InventoryLedger::new(cfg));
        let catalog = Arc::new(PrescriptionCatalog::new());
        let audit = Arc::new(AuditTrail::new());

        let coordinator = Arc::new(DispenseCoordinator::new(
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&formulary),
            Arc::clone(&directory),
            Arc::clone(&audit),
            cfg,
        ));

        Self {
            formulary,
            directory,
            ledger,
            catalog,
            audit,
            coordinator,
        }
    }

    // --- formulary ---

    pub fn register_medication(&self, input: NewMedication) -> DispenseResult<Medication> {
        self.formulary.register(input)
    }

    pub fn get_medication(&self, id: EntityId) -> DispenseResult<Medication> {
        self.formulary.get(id)
    }

    pub fn list_medications(&self) -> Vec<Medication> {
        self.formulary.list()
    }

    // --- directory ---

    pub fn register_nurse(&self, name: &str) -> DispenseResult<EntityId> {
        self.directory.register_nurse(name)
    }

    pub fn register_facility(&self, name: &str) -> DispenseResult<EntityId> {
        self.directory.register_facility(name)
    }

    pub fn register_patient(&self, name: &str) -> DispenseResult<EntityId> {
        self.directory.register_patient(name)
    }

    // --- inventory ---

    /// Registers a stock record after checking the facility and medication
    /// are known.
    pub fn add_inventory_record(
        &self,
        input: NewInventoryRecord,
    ) -> DispenseResult<InventoryRecord> {
        if !self.directory.facility_exists(input.facility_id) {
            return Err(DispenseError::Validation(format!(
                "unknown facility {}",
                input.facility_id
            )));
        }
        if !self.formulary.contains(input.medication_id) {
            return Err(DispenseError::Validation(format!(
                "unknown medication {}",
                input.medication_id
            )));
        }
        self.ledger.add_record(input)
    }

    pub fn availability(
        &self,
        facility_id: EntityId,
        medication_id: EntityId,
    ) -> StockAvailability {
        self.ledger.availability(facility_id, medication_id)
    }

    pub fn restock(&self, record_id: EntityId, quantity: u32) -> DispenseResult<u32> {
        self.ledger.restock(record_id, quantity)
    }

    pub fn facility_inventory(&self, facility_id: EntityId) -> Vec<InventoryRecord> {
        self.ledger.records_for_facility(facility_id)
    }

    // --- prescriptions ---

    /// Creates a prescription after checking the referenced patient, facility
    /// and medications are registered. Shape validation and end-date
    /// derivation happen in the catalog.
    pub fn create_prescription(&self, input: NewPrescription) -> DispenseResult<Prescription> {
        if !self.directory.patient_exists(input.patient_id) {
            return Err(DispenseError::Validation(format!(
                "unknown patient {}",
                input.patient_id
            )));
        }
        if !self.directory.facility_exists(input.facility_id) {
            return Err(DispenseError::Validation(format!(
                "unknown facility {}",
                input.facility_id
            )));
        }
        for item in &input.items {
            if !self.formulary.contains(item.medication_id) {
                return Err(DispenseError::Validation(format!(
                    "unknown medication {}",
                    item.medication_id
                )));
            }
        }
        self.catalog.create(input)
    }

    pub fn get_prescription(&self, id: EntityId) -> DispenseResult<Prescription> {
        self.catalog.get(id)
    }

    pub fn prescriptions_for_patient(&self, patient_id: EntityId) -> Vec<Prescription> {
        self.catalog.list_for_patient(patient_id)
    }

    pub fn cancel_prescription(&self, id: EntityId) -> DispenseResult<Prescription> {
        self.catalog.cancel(id)
    }

    // --- dispensing ---

    pub fn dispense(&self, request: DispenseRequest) -> DispenseResult<DispenseOutcome> {
        self.coordinator.dispense(request)
    }

    pub fn audit_log(&self) -> Vec<DispenseTransaction> {
        self.audit.ordered()
    }

    /// Direct ledger access for tests and the audit replay endpoint.
    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::prescription::NewPrescriptionItem;

    fn service() -> PharmacyService {
        PharmacyService::new(&CoreConfig::default())
    }

    #[test]
    fn create_prescription_rejects_unknown_patient() {
        let svc = service();
        let facility = svc.register_facility("Hlatikulu Clinic").unwrap();
        let medication = svc
            .register_medication(crate::medication::NewMedication {
                name: "Amoxicillin".into(),
                generic_name: "amoxicillin".into(),
                form: "capsule".into(),
                strength: "250mg".into(),
                is_controlled: false,
                is_art: false,
            })
            .unwrap();

        let err = svc
            .create_prescription(NewPrescription {
                patient_id: EntityId::new(),
                facility_id: facility,
                prescriber_id: EntityId::new(),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                notes: None,
                items: vec![NewPrescriptionItem {
                    medication_id: medication.id,
                    dosage: "1 capsule".into(),
                    frequency: "three times daily".into(),
                    quantity: 21,
                    duration_days: Some(7),
                    instructions: None,
                }],
            })
            .expect_err("unknown patient");
        assert!(matches!(err, DispenseError::Validation(_)));
    }

    #[test]
    fn create_prescription_rejects_unknown_medication() {
        let svc = service();
        let facility = svc.register_facility("Hlatikulu Clinic").unwrap();
        let patient = svc.register_patient("N. Mamba").unwrap();

        let err = svc
            .create_prescription(NewPrescription {
                patient_id: patient,
                facility_id: facility,
                prescriber_id: EntityId::new(),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                notes: None,
                items: vec![NewPrescriptionItem {
                    medication_id: EntityId::new(),
                    dosage: "1 capsule".into(),
                    frequency: "three times daily".into(),
                    quantity: 21,
                    duration_days: Some(7),
                    instructions: None,
                }],
            })
            .expect_err("unknown medication");
        assert!(matches!(err, DispenseError::Validation(_)));
    }

    #[test]
    fn add_inventory_rejects_unknown_references() {
        let svc = service();
        let facility = svc.register_facility("Hlatikulu Clinic").unwrap();

        let err = svc
            .add_inventory_record(NewInventoryRecord {
                facility_id: facility,
                medication_id: EntityId::new(),
                quantity_on_hand: 10,
                reorder_level: 2,
                unit: "tablets".into(),
                batch_number: None,
                expiry_date: None,
                supplier: None,
                cost_per_unit: None,
            })
            .expect_err("unknown medication");
        assert!(matches!(err, DispenseError::Validation(_)));
    }

    #[test]
    fn end_to_end_create_and_dispense() {
        let svc = service();
        let facility = svc.register_facility("Hlatikulu Clinic").unwrap();
        let nurse = svc.register_nurse("L. Shongwe").unwrap();
        let patient = svc.register_patient("N. Mamba").unwrap();
        let medication = svc
            .register_medication(crate::medication::NewMedication {
                name: "Amoxicillin".into(),
                generic_name: "amoxicillin".into(),
                form: "capsule".into(),
                strength: "250mg".into(),
                is_controlled: false,
                is_art: false,
            })
            .unwrap();
        let record = svc
            .add_inventory_record(NewInventoryRecord {
                facility_id: facility,
                medication_id: medication.id,
                quantity_on_hand: 100,
                reorder_level: 10,
                unit: "capsules".into(),
                batch_number: None,
                expiry_date: None,
                supplier: None,
                cost_per_unit: None,
            })
            .unwrap();

        let prescription = svc
            .create_prescription(NewPrescription {
                patient_id: patient,
                facility_id: facility,
                prescriber_id: EntityId::new(),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                notes: None,
                items: vec![NewPrescriptionItem {
                    medication_id: medication.id,
                    dosage: "1 capsule".into(),
                    frequency: "three times daily".into(),
                    quantity: 21,
                    duration_days: Some(7),
                    instructions: None,
                }],
            })
            .unwrap();

        // item ids from create are directly usable in a dispense call
        let outcome = svc
            .dispense(crate::dispense::DispenseRequest {
                prescription_id: prescription.id,
                nurse_id: nurse,
                facility_id: facility,
                lines: vec![crate::dispense::DispenseRequestLine {
                    prescription_item_id: prescription.items[0].id,
                    quantity_dispensed: 21,
                    batch_number: None,
                    notes: None,
                }],
            })
            .unwrap();

        assert_eq!(
            outcome.prescription_status,
            crate::prescription::PrescriptionStatus::Completed
        );
        assert_eq!(svc.ledger().snapshot(record.id).unwrap().quantity_on_hand, 79);
        assert_eq!(svc.audit_log().len(), 1);
    }
}
