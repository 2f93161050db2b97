//! Medication reference data.
//!
//! The formulary holds the immutable medication records that prescriptions
//! and inventory records reference by id. Creating and editing the formulary
//! is an administrative flow; the dispensing engine only ever reads it, most
//! importantly to put human-readable medication names into structured
//! failures.

use crate::shared::{read_lock, write_lock};
use crate::{DispenseError, DispenseResult};
use rx_id::EntityId;
use rx_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// An immutable medication reference record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Medication {
    pub id: EntityId,
    pub name: String,
    pub generic_name: String,
    /// Pharmaceutical form, e.g. "tablet" or "oral solution".
    pub form: String,
    /// Strength per unit, e.g. "300mg".
    pub strength: String,
    pub is_controlled: bool,
    /// Antiretroviral therapy flag.
    pub is_art: bool,
    pub active: bool,
}

/// Input for registering a medication.
#[derive(Clone, Debug, Deserialize)]
pub struct NewMedication {
    pub name: String,
    pub generic_name: String,
    pub form: String,
    pub strength: String,
    pub is_controlled: bool,
    pub is_art: bool,
}

/// Registry of medication reference data.
///
/// Records are immutable once registered; the registry itself only grows.
#[derive(Debug, Default)]
pub struct MedicationFormulary {
    medications: RwLock<BTreeMap<EntityId, Medication>>,
}

impl MedicationFormulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new medication and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::Validation` if the name is blank.
    pub fn register(&self, input: NewMedication) -> DispenseResult<Medication> {
        let name = NonEmptyText::new(&input.name)
            .map_err(|_| DispenseError::Validation("medication name cannot be empty".into()))?;

        let medication = Medication {
            id: EntityId::new(),
            name: name.as_str().to_owned(),
            generic_name: input.generic_name,
            form: input.form,
            strength: input.strength,
            is_controlled: input.is_controlled,
            is_art: input.is_art,
            active: true,
        };

        let mut medications = write_lock(&self.medications);
        medications.insert(medication.id, medication.clone());
        Ok(medication)
    }

    /// Returns the medication with the given id.
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::NotFound` if the id is not registered.
    pub fn get(&self, id: EntityId) -> DispenseResult<Medication> {
        read_lock(&self.medications)
            .get(&id)
            .cloned()
            .ok_or(DispenseError::NotFound {
                entity: "medication",
                id: id.to_string(),
            })
    }

    /// Returns true if the id is registered.
    pub fn contains(&self, id: EntityId) -> bool {
        read_lock(&self.medications).contains_key(&id)
    }

    /// Returns all registered medications in id order.
    pub fn list(&self) -> Vec<Medication> {
        read_lock(&self.medications).values().cloned().collect()
    }

    /// Returns the display name for a medication id, falling back to the raw
    /// id when the formulary has no entry. Used when building structured
    /// failures, which must never themselves fail.
    pub fn display_name(&self, id: EntityId) -> String {
        read_lock(&self.medications)
            .get(&id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}
