//! Wire types for the rx REST API.
//!
//! Identifiers travel as canonical 32-hex strings and dates as ISO-8601
//! strings (`YYYY-MM-DD` for clinical dates, RFC 3339 for timestamps); the
//! API layer parses and validates them at the boundary. Keeping these types
//! free of core dependencies lets the CLI and any future transport reuse
//! them unchanged.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Structured failure body.
///
/// `code` is a stable machine-readable discriminator; the optional fields
/// carry the per-line detail (medication name, requested vs available or
/// remaining) the UI renders next to the offending line.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medication: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
}

/// Request to register a medication.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateMedicationReq {
    pub name: String,
    pub generic_name: String,
    pub form: String,
    pub strength: String,
    #[serde(default)]
    pub is_controlled: bool,
    #[serde(default)]
    pub is_art: bool,
}

/// A medication reference record.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MedicationRes {
    pub id: String,
    pub name: String,
    pub generic_name: String,
    pub form: String,
    pub strength: String,
    pub is_controlled: bool,
    pub is_art: bool,
    pub active: bool,
}

/// List of registered medications.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ListMedicationsRes {
    pub medications: Vec<MedicationRes>,
}

/// Request to register a nurse, facility or patient.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterPartyReq {
    pub name: String,
}

/// Allocated identifier for a registered party.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterPartyRes {
    pub id: String,
}

/// Request to register a stock record.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AddInventoryReq {
    pub facility_id: String,
    pub medication_id: String,
    pub quantity_on_hand: u32,
    pub reorder_level: u32,
    pub unit: String,
    #[serde(default)]
    pub batch_number: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
}

/// One stock record.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct InventoryRecordRes {
    pub id: String,
    pub facility_id: String,
    pub medication_id: String,
    pub quantity_on_hand: u32,
    pub reorder_level: u32,
    pub unit: String,
    pub batch_number: Option<String>,
    pub expiry_date: Option<String>,
    pub supplier: Option<String>,
    pub cost_per_unit: Option<f64>,
}

/// Stock position for one facility/medication pair.
///
/// `record_id` and `unit` are absent when the pair is unstocked; the UI
/// renders that as "0 / N/A".
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AvailabilityRes {
    pub record_id: Option<String>,
    pub facility_id: String,
    pub medication_id: String,
    pub quantity_on_hand: u32,
    pub reorder_level: u32,
    pub unit: Option<String>,
    pub is_low: bool,
    pub is_expiring_soon: bool,
}

/// Request to restock a record.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RestockReq {
    pub quantity: u32,
}

/// New stock level after a restock.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RestockRes {
    pub record_id: String,
    pub quantity_on_hand: u32,
}

/// One prescription line in a create request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PrescriptionItemReq {
    pub medication_id: String,
    pub dosage: String,
    pub frequency: String,
    pub quantity: u32,
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Request to create a prescription.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePrescriptionReq {
    pub patient_id: String,
    pub facility_id: String,
    pub prescriber_id: String,
    /// `YYYY-MM-DD`
    pub start_date: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<PrescriptionItemReq>,
}

/// One prescription line with its authoritative id and dispensing progress.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PrescriptionItemRes {
    pub id: String,
    pub medication_id: String,
    pub dosage: String,
    pub frequency: String,
    pub quantity: u32,
    pub duration_days: Option<u32>,
    pub instructions: Option<String>,
    pub quantity_dispensed: u32,
    pub remaining: u32,
}

/// A prescription with its items.
///
/// The item ids carried here are the only valid references for a subsequent
/// dispense call.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PrescriptionRes {
    pub id: String,
    pub number: String,
    pub patient_id: String,
    pub facility_id: String,
    pub prescriber_id: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub items: Vec<PrescriptionItemRes>,
}

/// Prescriptions for one patient.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ListPrescriptionsRes {
    pub prescriptions: Vec<PrescriptionRes>,
}

/// One line of a dispense request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DispenseLineReq {
    pub prescription_item_id: String,
    pub quantity_dispensed: u32,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A dispense request.
///
/// The caller's identity arrives explicitly; the server never infers it from
/// ambient session state.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DispenseReq {
    pub nurse_id: String,
    pub facility_id: String,
    pub lines: Vec<DispenseLineReq>,
}

/// One committed dispense line.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DispensedLineRes {
    pub prescription_item_id: String,
    pub inventory_record_id: String,
    pub quantity_dispensed: u32,
    pub batch_number: Option<String>,
    pub notes: Option<String>,
}

/// A committed dispense transaction.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DispenseRes {
    pub transaction_id: String,
    pub prescription_id: String,
    pub nurse_id: String,
    pub facility_id: String,
    pub dispensed_at: String,
    pub prescription_status: String,
    pub dispensed_lines: Vec<DispensedLineRes>,
}

/// The dispense history, ordered by transaction time.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditRes {
    pub transactions: Vec<DispenseRes>,
}
