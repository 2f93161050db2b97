//! The dispense transaction.
//!
//! A dispense releases prescribed medication to a patient: it validates the
//! request against the authoritative prescription, decrements the facility's
//! inventory records and writes provenance to the audit trail, all lines as
//! one atomic unit. A failed call mutates nothing.
//!
//! Lock protocol: the prescription's lock is taken first (it serialises the
//! per-item cumulative tally), then every distinct inventory record touched
//! by the request, in ascending record-id order. Ascending order across all
//! concurrent dispenses rules out lock cycles; acquisition uses `try_lock`
//! with a bounded backoff-and-retry so contention surfaces as a
//! `ConcurrencyConflict` instead of an indefinite block.

use crate::audit::{AuditTrail, DispenseLine, DispenseTransaction};
use crate::directory::Directory;
use crate::inventory::{InventoryLedger, RecordHandle};
use crate::medication::MedicationFormulary;
use crate::prescription::{
    lock_prescription, Prescription, PrescriptionCatalog, PrescriptionStatus,
};
use crate::{CoreConfig, DispenseError, DispenseResult};
use chrono::Utc;
use rx_id::EntityId;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::TryLockError;
use std::time::Duration;

/// One requested line: which prescription item, and how much.
#[derive(Clone, Debug)]
pub struct DispenseRequestLine {
    pub prescription_item_id: EntityId,
    pub quantity_dispensed: u32,
    pub batch_number: Option<String>,
    pub notes: Option<String>,
}

/// A dispense request as submitted by clinical staff.
///
/// `nurse_id` and `facility_id` are explicit parameters resolved by the
/// caller's authentication layer; the coordinator never reads ambient
/// session state.
#[derive(Clone, Debug)]
pub struct DispenseRequest {
    pub prescription_id: EntityId,
    pub nurse_id: EntityId,
    pub facility_id: EntityId,
    pub lines: Vec<DispenseRequestLine>,
}

/// Result of a committed dispense.
#[derive(Clone, Debug)]
pub struct DispenseOutcome {
    pub transaction: DispenseTransaction,
    pub prescription_status: PrescriptionStatus,
}

/// Per-line plan assembled under the prescription lock: the resolved item and
/// inventory record for one request line.
struct LinePlan {
    prescription_item_id: EntityId,
    medication_id: EntityId,
    record_id: EntityId,
    quantity: u32,
    batch_number: Option<String>,
    notes: Option<String>,
}

/// Orchestrates the atomic multi-item dispense transaction.
pub struct DispenseCoordinator {
    catalog: Arc<PrescriptionCatalog>,
    ledger: Arc<InventoryLedger>,
    formulary: Arc<MedicationFormulary>,
    directory: Arc<Directory>,
    audit: Arc<AuditTrail>,
    lock_retries: u32,
    lock_backoff: Duration,
}

impl DispenseCoordinator {
    pub fn new(
        catalog: Arc<PrescriptionCatalog>,
        ledger: Arc<InventoryLedger>,
        formulary: Arc<MedicationFormulary>,
        directory: Arc<Directory>,
        audit: Arc<AuditTrail>,
        cfg: &CoreConfig,
    ) -> Self {
        Self {
            catalog,
            ledger,
            formulary,
            directory,
            audit,
            lock_retries: cfg.lock_retries(),
            lock_backoff: cfg.lock_backoff(),
        }
    }

    /// Executes one dispense as a single atomic unit: all lines succeed or
    /// none do.
    ///
    /// # Errors
    ///
    /// - `Validation`: empty or duplicate line set.
    /// - `NotFound`: unknown prescription.
    /// - `Transition`: prescription not in a dispensable status.
    /// - `AuthContext`: nurse or facility not resolvable.
    /// - `ReferenceMismatch`: a line references an item outside this
    ///   prescription.
    /// - `InsufficientStock` / `OverDispense`: stock or prescription ceiling
    ///   violated; checked before and re-checked inside the critical section.
    /// - `ConcurrencyConflict`: inventory locks still contended after retry.
    ///
    /// Every failure leaves inventory, prescription and audit state exactly
    /// as they were.
    pub fn dispense(&self, request: DispenseRequest) -> DispenseResult<DispenseOutcome> {
        if request.lines.is_empty() {
            return Err(DispenseError::Validation(
                "a dispense needs at least one line".into(),
            ));
        }

        let mut seen = HashSet::new();
        for line in &request.lines {
            if !seen.insert(line.prescription_item_id) {
                return Err(DispenseError::Validation(format!(
                    "duplicate line for prescription item {}",
                    line.prescription_item_id
                )));
            }
        }

        // Fresh authoritative read; the client's cached view of the
        // prescription is never trusted.
        let prescription_handle = self.catalog.handle(request.prescription_id)?;
        let mut prescription = lock_prescription(&prescription_handle);

        if !prescription.status.is_dispensable() {
            return Err(DispenseError::Transition {
                prescription_id: request.prescription_id,
                status: prescription.status,
            });
        }

        self.directory
            .resolve_care_context(request.nurse_id, request.facility_id)?;

        let plans = self.plan_lines(&prescription, &request)?;

        // Requested units per distinct inventory record; two items of the
        // same medication draw from the same record.
        let mut per_record: BTreeMap<EntityId, u32> = BTreeMap::new();
        for plan in &plans {
            *per_record.entry(plan.record_id).or_insert(0) += plan.quantity;
        }

        // BTreeMap iteration is ascending by record id, which is exactly the
        // acquisition order the deadlock-avoidance protocol requires.
        let ordered_handles: Vec<(EntityId, RecordHandle)> = per_record
            .keys()
            .map(|record_id| Ok((*record_id, self.ledger.handle(*record_id)?)))
            .collect::<DispenseResult<_>>()?;

        let mut attempts_left = self.lock_retries + 1;
        let guards = 'acquire: loop {
            attempts_left -= 1;
            let mut guards = Vec::with_capacity(ordered_handles.len());
            for (_, handle) in &ordered_handles {
                match handle.try_lock() {
                    Ok(guard) => guards.push(guard),
                    Err(TryLockError::Poisoned(poisoned)) => guards.push(poisoned.into_inner()),
                    Err(TryLockError::WouldBlock) => {
                        drop(guards);
                        if attempts_left == 0 {
                            tracing::warn!(
                                prescription = %prescription.number,
                                "inventory locks contended, dispense aborted"
                            );
                            return Err(DispenseError::ConcurrencyConflict);
                        }
                        std::thread::sleep(self.lock_backoff);
                        continue 'acquire;
                    }
                }
            }
            break guards;
        };

        // Authoritative validation: re-run every stock and ceiling check with
        // the locks held. Nothing has been mutated yet, so any failure here
        // is a clean abort.
        for ((record_id, _), guard) in ordered_handles.iter().zip(&guards) {
            let requested = per_record[record_id];
            if guard.quantity_on_hand < requested {
                return Err(DispenseError::InsufficientStock {
                    medication: self.formulary.display_name(guard.medication_id),
                    requested,
                    available: guard.quantity_on_hand,
                });
            }
        }
        for plan in &plans {
            // The prescription lock has been held since the plan was built,
            // so remaining() cannot have moved in the meantime.
            let item = prescription
                .item(plan.prescription_item_id)
                .ok_or(DispenseError::ReferenceMismatch {
                    prescription_id: request.prescription_id,
                    item_id: plan.prescription_item_id,
                })?;
            if plan.quantity > item.remaining() {
                return Err(DispenseError::OverDispense {
                    medication: self.formulary.display_name(plan.medication_id),
                    requested: plan.quantity,
                    remaining: item.remaining(),
                });
            }
        }

        // Commit point: decrement stock, tally items, write provenance.
        let transaction_id = EntityId::new();
        let dispensed_at = Utc::now();

        let mut guards = guards;
        for ((record_id, _), guard) in ordered_handles.iter().zip(guards.iter_mut()) {
            guard.quantity_on_hand -= per_record[record_id];
        }

        let mut lines = Vec::with_capacity(plans.len());
        for plan in plans {
            let batch_number = match plan.batch_number {
                Some(batch) => Some(batch),
                None => ordered_handles
                    .iter()
                    .zip(&guards)
                    .find(|((record_id, _), _)| *record_id == plan.record_id)
                    .and_then(|(_, guard)| guard.batch_number.clone()),
            };

            for item in prescription.items.iter_mut() {
                if item.id == plan.prescription_item_id {
                    item.dispensed_total += plan.quantity;
                }
            }

            lines.push(DispenseLine {
                dispense_transaction_id: transaction_id,
                prescription_item_id: plan.prescription_item_id,
                inventory_record_id: plan.record_id,
                quantity_dispensed: plan.quantity,
                batch_number,
                notes: plan.notes,
            });
        }

        prescription.status = if prescription.all_items_fully_dispensed() {
            PrescriptionStatus::Completed
        } else {
            PrescriptionStatus::PartiallyDispensed
        };

        let transaction = DispenseTransaction {
            id: transaction_id,
            prescription_id: request.prescription_id,
            nurse_id: request.nurse_id,
            facility_id: request.facility_id,
            dispensed_at,
            lines,
        };

        drop(guards);
        let status = prescription.status;
        tracing::info!(
            prescription = %prescription.number,
            transaction = %transaction.id,
            lines = transaction.lines.len(),
            status = %status,
            "dispense committed"
        );
        drop(prescription);

        self.audit.append(transaction.clone());

        Ok(DispenseOutcome {
            transaction,
            prescription_status: status,
        })
    }

    /// Resolves every request line against the freshly read prescription and
    /// the facility's stock.
    ///
    /// Membership of every item id is a precondition and is verified for the
    /// whole line set first. The stock and ceiling checks here are advisory:
    /// they fail fast without touching anything, and every one of them is
    /// re-run inside the critical section before the first mutation. The
    /// advisory stock read uses `try_lock` and simply skips a record that is
    /// locked elsewhere at this instant; the authoritative check will see it.
    fn plan_lines(
        &self,
        prescription: &Prescription,
        request: &DispenseRequest,
    ) -> DispenseResult<Vec<LinePlan>> {
        for line in &request.lines {
            if prescription.item(line.prescription_item_id).is_none() {
                return Err(DispenseError::ReferenceMismatch {
                    prescription_id: prescription.id,
                    item_id: line.prescription_item_id,
                });
            }
        }

        let mut plans = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let item = prescription
                .item(line.prescription_item_id)
                .ok_or(DispenseError::ReferenceMismatch {
                    prescription_id: prescription.id,
                    item_id: line.prescription_item_id,
                })?;

            let medication = self.formulary.display_name(item.medication_id);

            let (record_id, record_handle) = self
                .ledger
                .find(request.facility_id, item.medication_id)
                .ok_or_else(|| DispenseError::InsufficientStock {
                    medication: medication.clone(),
                    requested: line.quantity_dispensed,
                    available: 0,
                })?;

            let on_hand_now = match record_handle.try_lock() {
                Ok(record) => Some(record.quantity_on_hand),
                Err(TryLockError::Poisoned(poisoned)) => {
                    Some(poisoned.into_inner().quantity_on_hand)
                }
                Err(TryLockError::WouldBlock) => None,
            };

            if line.quantity_dispensed == 0 {
                return Err(DispenseError::InsufficientStock {
                    medication,
                    requested: 0,
                    available: on_hand_now.unwrap_or(0),
                });
            }

            if let Some(available) = on_hand_now {
                if line.quantity_dispensed > available {
                    return Err(DispenseError::InsufficientStock {
                        medication,
                        requested: line.quantity_dispensed,
                        available,
                    });
                }
            }

            if line.quantity_dispensed > item.remaining() {
                return Err(DispenseError::OverDispense {
                    medication,
                    requested: line.quantity_dispensed,
                    remaining: item.remaining(),
                });
            }

            plans.push(LinePlan {
                prescription_item_id: item.id,
                medication_id: item.medication_id,
                record_id,
                quantity: line.quantity_dispensed,
                batch_number: line.batch_number.clone(),
                notes: line.notes.clone(),
            });
        }

        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::NewInventoryRecord;
    use crate::medication::NewMedication;
    use crate::prescription::{NewPrescription, NewPrescriptionItem};
    use chrono::NaiveDate;

    struct Fixture {
        catalog: Arc<PrescriptionCatalog>,
        ledger: Arc<InventoryLedger>,
        formulary: Arc<MedicationFormulary>,
        audit: Arc<AuditTrail>,
        coordinator: DispenseCoordinator,
        nurse_id: EntityId,
        facility_id: EntityId,
        patient_id: EntityId,
    }

    fn fixture() -> Fixture {
        fixture_with_config(CoreConfig::default())
    }

    fn fixture_with_config(cfg: CoreConfig) -> Fixture {
        let catalog = Arc::new(PrescriptionCatalog::new());
        let ledger = Arc::new(InventoryLedger::new(&cfg));
        let formulary = Arc::new(MedicationFormulary::new());
        let directory = Arc::new(Directory::new());
        let audit = Arc::new(AuditTrail::new());

        let coordinator = DispenseCoordinator::new(
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&formulary),
            Arc::clone(&directory),
            Arc::clone(&audit),
            &cfg,
        );

        let nurse_id = directory.register_nurse("S. Nkambule").unwrap();
        let facility_id = directory.register_facility("Manzini Clinic").unwrap();
        let patient_id = directory.register_patient("B. Dube").unwrap();

        Fixture {
            catalog,
            ledger,
            formulary,
            audit,
            coordinator,
            nurse_id,
            facility_id,
            patient_id,
        }
    }

    fn medication(fixture: &Fixture, name: &str) -> EntityId {
        fixture
            .formulary
            .register(NewMedication {
                name: name.into(),
                generic_name: name.into(),
                form: "tablet".into(),
                strength: "100mg".into(),
                is_controlled: false,
                is_art: false,
            })
            .unwrap()
            .id
    }

    fn stock(fixture: &Fixture, medication_id: EntityId, on_hand: u32) -> EntityId {
        fixture
            .ledger
            .add_record(NewInventoryRecord {
                facility_id: fixture.facility_id,
                medication_id,
                quantity_on_hand: on_hand,
                reorder_level: 5,
                unit: "tablets".into(),
                batch_number: Some("B-77".into()),
                expiry_date: None,
                supplier: None,
                cost_per_unit: None,
            })
            .unwrap()
            .id
    }

    fn prescribe(
        fixture: &Fixture,
        items: Vec<(EntityId, u32)>,
    ) -> crate::prescription::Prescription {
        fixture
            .catalog
            .create(NewPrescription {
                patient_id: fixture.patient_id,
                facility_id: fixture.facility_id,
                prescriber_id: EntityId::new(),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                notes: None,
                items: items
                    .into_iter()
                    .map(|(medication_id, quantity)| NewPrescriptionItem {
                        medication_id,
                        dosage: "1 tablet".into(),
                        frequency: "once daily".into(),
                        quantity,
                        duration_days: Some(30),
                        instructions: None,
                    })
                    .collect(),
            })
            .unwrap()
    }

    fn request(
        fixture: &Fixture,
        prescription: &crate::prescription::Prescription,
        quantities: &[u32],
    ) -> DispenseRequest {
        DispenseRequest {
            prescription_id: prescription.id,
            nurse_id: fixture.nurse_id,
            facility_id: fixture.facility_id,
            lines: prescription
                .items
                .iter()
                .zip(quantities)
                .map(|(item, &quantity_dispensed)| DispenseRequestLine {
                    prescription_item_id: item.id,
                    quantity_dispensed,
                    batch_number: None,
                    notes: None,
                })
                .collect(),
        }
    }

    #[test]
    fn full_dispense_completes_the_prescription() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        let record = stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        let outcome = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[30]))
            .unwrap();

        assert_eq!(outcome.prescription_status, PrescriptionStatus::Completed);
        assert_eq!(outcome.transaction.lines.len(), 1);
        assert_eq!(outcome.transaction.lines[0].quantity_dispensed, 30);
        // line batch number falls back to the record's batch
        assert_eq!(
            outcome.transaction.lines[0].batch_number.as_deref(),
            Some("B-77")
        );
        assert_eq!(fx.ledger.snapshot(record).unwrap().quantity_on_hand, 20);
        assert_eq!(fx.audit.ordered().len(), 1);
    }

    #[test]
    fn partial_dispense_keeps_prescription_dispensable() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        let outcome = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[10]))
            .unwrap();
        assert_eq!(
            outcome.prescription_status,
            PrescriptionStatus::PartiallyDispensed
        );

        let outcome = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[20]))
            .unwrap();
        assert_eq!(outcome.prescription_status, PrescriptionStatus::Completed);

        // terminal now: further dispensing is a transition error
        let err = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[1]))
            .expect_err("completed prescription");
        assert!(matches!(err, DispenseError::Transition { .. }));
    }

    #[test]
    fn over_dispense_across_calls_is_rejected() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        let record = stock(&fx, med, 100);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        fx.coordinator
            .dispense(request(&fx, &prescription, &[25]))
            .unwrap();

        let err = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[10]))
            .expect_err("ceiling");
        match err {
            DispenseError::OverDispense {
                requested,
                remaining,
                ..
            } => {
                assert_eq!(requested, 10);
                assert_eq!(remaining, 5);
            }
            other => panic!("expected OverDispense, got {other:?}"),
        }

        // the failed call changed nothing
        assert_eq!(fx.ledger.snapshot(record).unwrap().quantity_on_hand, 75);
    }

    #[test]
    fn boundary_exact_stock_drains_to_zero_and_one_more_fails() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        let record = stock(&fx, med, 10);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        let outcome = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[10]))
            .unwrap();
        assert_eq!(fx.ledger.snapshot(record).unwrap().quantity_on_hand, 0);
        assert_eq!(
            outcome.prescription_status,
            PrescriptionStatus::PartiallyDispensed
        );

        let err = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[1]))
            .expect_err("stock drained");
        match err {
            DispenseError::InsufficientStock {
                medication,
                requested,
                available,
            } => {
                assert_eq!(medication, "Amoxicillin");
                assert_eq!(requested, 1);
                assert_eq!(available, 0);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(fx.ledger.snapshot(record).unwrap().quantity_on_hand, 0);
    }

    #[test]
    fn foreign_item_id_is_reference_mismatch_with_zero_mutation() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        let other_med = medication(&fx, "Paracetamol");
        let record = stock(&fx, med, 50);
        stock(&fx, other_med, 50);

        let prescription = prescribe(&fx, vec![(med, 30)]);
        let other = prescribe(&fx, vec![(other_med, 10)]);

        let mut req = request(&fx, &prescription, &[5]);
        req.lines[0].prescription_item_id = other.items[0].id;

        let err = fx.coordinator.dispense(req).expect_err("foreign item");
        match err {
            DispenseError::ReferenceMismatch {
                prescription_id,
                item_id,
            } => {
                assert_eq!(prescription_id, prescription.id);
                assert_eq!(item_id, other.items[0].id);
            }
            other => panic!("expected ReferenceMismatch, got {other:?}"),
        }

        assert_eq!(fx.ledger.snapshot(record).unwrap().quantity_on_hand, 50);
        assert!(fx.audit.ordered().is_empty());
    }

    #[test]
    fn multi_item_dispense_is_all_or_nothing() {
        let fx = fixture();
        let med_a = medication(&fx, "Amoxicillin");
        let med_b = medication(&fx, "Paracetamol");
        let record_a = stock(&fx, med_a, 50);
        let record_b = stock(&fx, med_b, 3);

        let prescription = prescribe(&fx, vec![(med_a, 30), (med_b, 10)]);

        // second line exceeds stock: the whole transaction must fail
        let err = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[10, 10]))
            .expect_err("second line over stock");
        match err {
            DispenseError::InsufficientStock { medication, .. } => {
                assert_eq!(medication, "Paracetamol");
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(fx.ledger.snapshot(record_a).unwrap().quantity_on_hand, 50);
        assert_eq!(fx.ledger.snapshot(record_b).unwrap().quantity_on_hand, 3);
        assert!(fx.audit.ordered().is_empty());

        // within stock, both lines land together
        let outcome = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[10, 3]))
            .unwrap();
        assert_eq!(outcome.transaction.lines.len(), 2);
        assert_eq!(fx.ledger.snapshot(record_a).unwrap().quantity_on_hand, 40);
        assert_eq!(fx.ledger.snapshot(record_b).unwrap().quantity_on_hand, 0);
    }

    #[test]
    fn unknown_nurse_is_auth_context_error() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        let mut req = request(&fx, &prescription, &[5]);
        req.nurse_id = EntityId::new();

        let err = fx.coordinator.dispense(req).expect_err("unknown nurse");
        assert!(matches!(err, DispenseError::AuthContext(_)));
    }

    #[test]
    fn cancelled_prescription_cannot_be_dispensed() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);
        fx.catalog.cancel(prescription.id).unwrap();

        let err = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[5]))
            .expect_err("cancelled");
        match err {
            DispenseError::Transition { status, .. } => {
                assert_eq!(status, PrescriptionStatus::Cancelled);
            }
            other => panic!("expected Transition, got {other:?}"),
        }
    }

    #[test]
    fn zero_quantity_line_is_rejected() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        let err = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[0]))
            .expect_err("zero quantity");
        assert!(matches!(err, DispenseError::InsufficientStock { .. }));
    }

    #[test]
    fn duplicate_lines_for_one_item_are_rejected() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        let mut req = request(&fx, &prescription, &[5]);
        req.lines.push(req.lines[0].clone());

        let err = fx.coordinator.dispense(req).expect_err("duplicate line");
        assert!(matches!(err, DispenseError::Validation(_)));
    }

    #[test]
    fn racing_dispenses_on_shared_stock_admit_exactly_one_winner() {
        let fx = Arc::new(fixture());
        let med = medication(&fx, "Amoxicillin");
        let record = stock(&fx, med, 10);

        // two prescriptions for different patients drawing on the same record
        let p1 = prescribe(&fx, vec![(med, 8)]);
        let p2 = prescribe(&fx, vec![(med, 8)]);

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let mut handles = Vec::new();
        for prescription in [p1, p2] {
            let fx = Arc::clone(&fx);
            let barrier = Arc::clone(&barrier);
            let req = request(&fx, &prescription, &[8]);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                fx.coordinator.dispense(req)
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

        assert_eq!(successes, 1);
        assert_eq!(failures.len(), 1);
        match failures[0] {
            DispenseError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(*requested, 8);
                assert!(*available <= 2);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(fx.ledger.snapshot(record).unwrap().quantity_on_hand, 2);
        assert_eq!(fx.audit.ordered().len(), 1);
    }

    #[test]
    fn contended_record_lock_reports_concurrency_conflict() {
        let cfg = CoreConfig::new(90, 1, Duration::from_millis(1)).unwrap();
        let fx = fixture_with_config(cfg);
        let med = medication(&fx, "Amoxicillin");
        let record = stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        // keep the record's lock held for longer than the coordinator is
        // willing to wait
        let handle = fx.ledger.handle(record).unwrap();
        let _guard = handle.lock().unwrap();

        let err = fx
            .coordinator
            .dispense(request(&fx, &prescription, &[5]))
            .expect_err("lock held elsewhere");
        assert!(matches!(err, DispenseError::ConcurrencyConflict));

        drop(_guard);
        // after the lock is released the same request succeeds
        fx.coordinator
            .dispense(request(&fx, &prescription, &[5]))
            .unwrap();
    }

    #[test]
    fn audit_replay_matches_ledger_state() {
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        let record = stock(&fx, med, 40);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        fx.coordinator
            .dispense(request(&fx, &prescription, &[10]))
            .unwrap();
        fx.coordinator
            .dispense(request(&fx, &prescription, &[5]))
            .unwrap();

        let history = fx.audit.replay_levels(record, 40).unwrap();
        assert_eq!(history, vec![30, 25]);
        assert_eq!(
            *history.last().unwrap(),
            fx.ledger.snapshot(record).unwrap().quantity_on_hand
        );
    }

    #[test]
    fn directory_is_consulted_before_any_stock_check() {
        // unknown facility: even with plenty of stock the request must fail
        // as an auth-context error, not a stock error
        let fx = fixture();
        let med = medication(&fx, "Amoxicillin");
        stock(&fx, med, 50);
        let prescription = prescribe(&fx, vec![(med, 30)]);

        let mut req = request(&fx, &prescription, &[5]);
        req.facility_id = EntityId::new();

        let err = fx.coordinator.dispense(req).expect_err("unknown facility");
        assert!(matches!(err, DispenseError::AuthContext(_)));
    }
}
