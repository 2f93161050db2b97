//! Staff, facility and patient registries.
//!
//! The dispensing core never reads ambient session state: the caller's nurse
//! and facility arrive as explicit parameters on every dispense call and are
//! resolved here. The patient registry only answers existence checks for
//! prescription creation.

use crate::shared::{read_lock, write_lock};
use crate::{DispenseError, DispenseResult};
use rx_id::EntityId;
use rx_types::NonEmptyText;
use std::collections::HashMap;
use std::sync::RwLock;

/// A resolved caller identity: who is dispensing, and where.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CareContext {
    pub nurse_id: EntityId,
    pub facility_id: EntityId,
}

/// Registries backing identity resolution and patient validity checks.
#[derive(Debug, Default)]
pub struct Directory {
    nurses: RwLock<HashMap<EntityId, String>>,
    facilities: RwLock<HashMap<EntityId, String>>,
    patients: RwLock<HashMap<EntityId, String>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a nurse and returns the allocated id.
    pub fn register_nurse(&self, name: &str) -> DispenseResult<EntityId> {
        Self::register(&self.nurses, name, "nurse")
    }

    /// Registers a facility and returns the allocated id.
    pub fn register_facility(&self, name: &str) -> DispenseResult<EntityId> {
        Self::register(&self.facilities, name, "facility")
    }

    /// Registers a patient and returns the allocated id.
    pub fn register_patient(&self, name: &str) -> DispenseResult<EntityId> {
        Self::register(&self.patients, name, "patient")
    }

    fn register(
        registry: &RwLock<HashMap<EntityId, String>>,
        name: &str,
        kind: &'static str,
    ) -> DispenseResult<EntityId> {
        let name = NonEmptyText::new(name)
            .map_err(|_| DispenseError::Validation(format!("{kind} name cannot be empty")))?;

        let id = EntityId::new();
        write_lock(registry).insert(id, name.as_str().to_owned());
        Ok(id)
    }

    /// Resolves a `(nurse_id, facility_id)` pair into a [`CareContext`].
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::AuthContext` naming whichever identity is
    /// unknown. Identity must be established before any inventory access.
    pub fn resolve_care_context(
        &self,
        nurse_id: EntityId,
        facility_id: EntityId,
    ) -> DispenseResult<CareContext> {
        if !read_lock(&self.nurses).contains_key(&nurse_id) {
            return Err(DispenseError::AuthContext(format!(
                "unknown nurse {nurse_id}"
            )));
        }
        if !read_lock(&self.facilities).contains_key(&facility_id) {
            return Err(DispenseError::AuthContext(format!(
                "unknown facility {facility_id}"
            )));
        }

        Ok(CareContext {
            nurse_id,
            facility_id,
        })
    }

    /// Returns true if the patient is registered.
    pub fn patient_exists(&self, patient_id: EntityId) -> bool {
        read_lock(&self.patients).contains_key(&patient_id)
    }

    /// Returns true if the facility is registered.
    pub fn facility_exists(&self, facility_id: EntityId) -> bool {
        read_lock(&self.facilities).contains_key(&facility_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_identities() {
        let directory = Directory::new();
        let nurse = directory.register_nurse("A. Dlamini").unwrap();
        let facility = directory.register_facility("Mbabane Clinic").unwrap();

        let context = directory.resolve_care_context(nurse, facility).unwrap();
        assert_eq!(context.nurse_id, nurse);
        assert_eq!(context.facility_id, facility);
    }

    #[test]
    fn unknown_nurse_is_auth_context_error() {
        let directory = Directory::new();
        let facility = directory.register_facility("Mbabane Clinic").unwrap();

        let err = directory
            .resolve_care_context(EntityId::new(), facility)
            .expect_err("unknown nurse");
        match err {
            DispenseError::AuthContext(msg) => assert!(msg.contains("nurse")),
            other => panic!("expected AuthContext, got {other:?}"),
        }
    }

    #[test]
    fn unknown_facility_is_auth_context_error() {
        let directory = Directory::new();
        let nurse = directory.register_nurse("A. Dlamini").unwrap();

        let err = directory
            .resolve_care_context(nurse, EntityId::new())
            .expect_err("unknown facility");
        match err {
            DispenseError::AuthContext(msg) => assert!(msg.contains("facility")),
            other => panic!("expected AuthContext, got {other:?}"),
        }
    }

    #[test]
    fn patient_existence_checks() {
        let directory = Directory::new();
        let patient = directory.register_patient("T. Simelane").unwrap();

        assert!(directory.patient_exists(patient));
        assert!(!directory.patient_exists(EntityId::new()));
    }

    #[test]
    fn blank_names_are_rejected() {
        let directory = Directory::new();
        assert!(directory.register_nurse("  ").is_err());
        assert!(directory.register_facility("").is_err());
        assert!(directory.register_patient("\t").is_err());
    }
}
