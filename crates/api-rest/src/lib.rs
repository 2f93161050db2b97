//! # API REST
//!
//! REST API implementation for the rx dispensing system.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, id/date parsing)
//!
//! Uses `api-shared` for wire types and the API-key check; all business rules
//! live in `rx-core`. Handlers translate between wire strings and core types
//! and map the error taxonomy onto HTTP status codes.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use api_shared::auth::require_api_key;
use api_shared::types as wire;
use api_shared::HealthService;
use chrono::NaiveDate;
use rx_core::audit::DispenseTransaction;
use rx_core::dispense::{DispenseRequest, DispenseRequestLine};
use rx_core::inventory::{InventoryRecord, NewInventoryRecord, StockAvailability};
use rx_core::medication::{Medication, NewMedication};
use rx_core::prescription::{NewPrescription, NewPrescriptionItem, Prescription};
use rx_core::{DispenseError, PharmacyService};
use rx_id::EntityId;

/// Application state for the REST API server
///
/// Contains shared state that needs to be accessible to all request handlers:
/// the `PharmacyService` facade over the dispensing core.
#[derive(Clone)]
pub struct AppState {
    pub service: PharmacyService,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        create_medication,
        list_medications,
        register_nurse,
        register_facility,
        register_patient,
        add_inventory,
        get_availability,
        restock,
        create_prescription,
        get_prescription,
        list_patient_prescriptions,
        dispense,
        cancel_prescription,
        audit_log,
    ),
    components(schemas(
        wire::HealthRes,
        wire::ErrorRes,
        wire::CreateMedicationReq,
        wire::MedicationRes,
        wire::ListMedicationsRes,
        wire::RegisterPartyReq,
        wire::RegisterPartyRes,
        wire::AddInventoryReq,
        wire::InventoryRecordRes,
        wire::AvailabilityRes,
        wire::RestockReq,
        wire::RestockRes,
        wire::PrescriptionItemReq,
        wire::CreatePrescriptionReq,
        wire::PrescriptionItemRes,
        wire::PrescriptionRes,
        wire::ListPrescriptionsRes,
        wire::DispenseLineReq,
        wire::DispenseReq,
        wire::DispensedLineRes,
        wire::DispenseRes,
        wire::AuditRes,
    ))
)]
pub struct ApiDoc;

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/medications", get(list_medications))
        .route("/medications", post(create_medication))
        .route("/directory/nurses", post(register_nurse))
        .route("/directory/facilities", post(register_facility))
        .route("/directory/patients", post(register_patient))
        .route("/inventory", post(add_inventory))
        .route(
            "/inventory/:facility_id/:medication_id",
            get(get_availability),
        )
        .route("/inventory/:record_id/restock", post(restock))
        .route("/prescriptions", post(create_prescription))
        .route("/prescriptions/:id", get(get_prescription))
        .route("/prescriptions/:id/dispense", post(dispense))
        .route("/prescriptions/:id/cancel", post(cancel_prescription))
        .route("/patients/:id/prescriptions", get(list_patient_prescriptions))
        .route("/audit", get(audit_log))
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiFailure = (StatusCode, Json<wire::ErrorRes>);

fn failure(code: StatusCode, kind: &str, message: String) -> ApiFailure {
    (
        code,
        Json(wire::ErrorRes {
            code: kind.into(),
            message,
            medication: None,
            requested: None,
            available: None,
            remaining: None,
        }),
    )
}

/// Maps the core error taxonomy onto HTTP statuses and structured bodies.
///
/// Stock, over-dispense, transition and concurrency failures are conflicts
/// with the current server state (409); the itemized detail is preserved so
/// the client can render per-line feedback.
fn map_error(err: DispenseError) -> ApiFailure {
    let message = err.to_string();
    match err {
        DispenseError::Validation(_) => failure(StatusCode::BAD_REQUEST, "validation", message),
        DispenseError::AuthContext(_) => {
            failure(StatusCode::UNAUTHORIZED, "auth_context", message)
        }
        DispenseError::NotFound { .. } => failure(StatusCode::NOT_FOUND, "not_found", message),
        DispenseError::ReferenceMismatch { .. } => {
            failure(StatusCode::CONFLICT, "reference_mismatch", message)
        }
        DispenseError::Transition { .. } => failure(StatusCode::CONFLICT, "transition", message),
        DispenseError::ConcurrencyConflict => {
            failure(StatusCode::CONFLICT, "concurrency_conflict", message)
        }
        DispenseError::InsufficientStock {
            medication,
            requested,
            available,
        } => (
            StatusCode::CONFLICT,
            Json(wire::ErrorRes {
                code: "insufficient_stock".into(),
                message,
                medication: Some(medication),
                requested: Some(requested),
                available: Some(available),
                remaining: None,
            }),
        ),
        DispenseError::OverDispense {
            medication,
            requested,
            remaining,
        } => (
            StatusCode::CONFLICT,
            Json(wire::ErrorRes {
                code: "over_dispense".into(),
                message,
                medication: Some(medication),
                requested: Some(requested),
                available: None,
                remaining: Some(remaining),
            }),
        ),
    }
}

fn auth_failure((code, message): (StatusCode, &'static str)) -> ApiFailure {
    failure(code, "unauthorized", message.into())
}

fn parse_id(input: &str, what: &'static str) -> Result<EntityId, ApiFailure> {
    EntityId::parse(input).map_err(|e| {
        tracing::error!("Invalid {} id: {:?}", what, e);
        failure(
            StatusCode::BAD_REQUEST,
            "validation",
            format!("invalid {what} id: {input}"),
        )
    })
}

fn parse_date(input: &str, what: &'static str) -> Result<NaiveDate, ApiFailure> {
    input.parse::<NaiveDate>().map_err(|e| {
        tracing::error!("Invalid {} date: {:?}", what, e);
        failure(
            StatusCode::BAD_REQUEST,
            "validation",
            format!("invalid {what} date (expected YYYY-MM-DD): {input}"),
        )
    })
}

fn medication_res(medication: Medication) -> wire::MedicationRes {
    wire::MedicationRes {
        id: medication.id.to_string(),
        name: medication.name,
        generic_name: medication.generic_name,
        form: medication.form,
        strength: medication.strength,
        is_controlled: medication.is_controlled,
        is_art: medication.is_art,
        active: medication.active,
    }
}

fn inventory_res(record: InventoryRecord) -> wire::InventoryRecordRes {
    wire::InventoryRecordRes {
        id: record.id.to_string(),
        facility_id: record.facility_id.to_string(),
        medication_id: record.medication_id.to_string(),
        quantity_on_hand: record.quantity_on_hand,
        reorder_level: record.reorder_level,
        unit: record.unit,
        batch_number: record.batch_number,
        expiry_date: record.expiry_date.map(|d| d.to_string()),
        supplier: record.supplier,
        cost_per_unit: record.cost_per_unit,
    }
}

fn availability_res(availability: StockAvailability) -> wire::AvailabilityRes {
    wire::AvailabilityRes {
        record_id: availability.record_id.map(|id| id.to_string()),
        facility_id: availability.facility_id.to_string(),
        medication_id: availability.medication_id.to_string(),
        quantity_on_hand: availability.quantity_on_hand,
        reorder_level: availability.reorder_level,
        unit: availability.unit,
        is_low: availability.is_low,
        is_expiring_soon: availability.is_expiring_soon,
    }
}

fn prescription_res(prescription: Prescription) -> wire::PrescriptionRes {
    wire::PrescriptionRes {
        id: prescription.id.to_string(),
        number: prescription.number.to_string(),
        patient_id: prescription.patient_id.to_string(),
        facility_id: prescription.facility_id.to_string(),
        prescriber_id: prescription.prescriber_id.to_string(),
        start_date: prescription.start_date.to_string(),
        end_date: prescription.end_date.map(|d| d.to_string()),
        status: prescription.status.to_string(),
        notes: prescription.notes,
        created_at: prescription.created_at.to_rfc3339(),
        items: prescription
            .items
            .into_iter()
            .map(|item| wire::PrescriptionItemRes {
                id: item.id.to_string(),
                medication_id: item.medication_id.to_string(),
                dosage: item.dosage.to_string(),
                frequency: item.frequency.to_string(),
                quantity: item.quantity.get(),
                duration_days: item.duration_days,
                instructions: item.instructions.clone(),
                quantity_dispensed: item.dispensed_total,
                remaining: item.remaining(),
            })
            .collect(),
    }
}

fn transaction_res(transaction: DispenseTransaction, status: String) -> wire::DispenseRes {
    wire::DispenseRes {
        transaction_id: transaction.id.to_string(),
        prescription_id: transaction.prescription_id.to_string(),
        nurse_id: transaction.nurse_id.to_string(),
        facility_id: transaction.facility_id.to_string(),
        dispensed_at: transaction.dispensed_at.to_rfc3339(),
        prescription_status: status,
        dispensed_lines: transaction
            .lines
            .into_iter()
            .map(|line| wire::DispensedLineRes {
                prescription_item_id: line.prescription_item_id.to_string(),
                inventory_record_id: line.inventory_record_id.to_string(),
                quantity_dispensed: line.quantity_dispensed,
                batch_number: line.batch_number,
                notes: line.notes,
            })
            .collect(),
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = wire::HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Returns the current health status of the rx service.
/// This endpoint is used for monitoring and load balancer health checks.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<wire::HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/medications",
    request_body = wire::CreateMedicationReq,
    responses(
        (status = 201, description = "Medication registered", body = wire::MedicationRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes),
        (status = 401, description = "Unauthorized", body = wire::ErrorRes)
    )
)]
/// Register a medication in the formulary
///
/// Medication records are immutable reference data; prescriptions and
/// inventory records refer to them by id.
#[axum::debug_handler]
async fn create_medication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<wire::CreateMedicationReq>,
) -> Result<Json<wire::MedicationRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;

    let medication = state
        .service
        .register_medication(NewMedication {
            name: req.name,
            generic_name: req.generic_name,
            form: req.form,
            strength: req.strength,
            is_controlled: req.is_controlled,
            is_art: req.is_art,
        })
        .map_err(map_error)?;

    Ok(Json(medication_res(medication)))
}

#[utoipa::path(
    get,
    path = "/medications",
    responses(
        (status = 200, description = "List of registered medications", body = wire::ListMedicationsRes)
    )
)]
/// List the formulary
#[axum::debug_handler]
async fn list_medications(State(state): State<AppState>) -> Json<wire::ListMedicationsRes> {
    let medications = state
        .service
        .list_medications()
        .into_iter()
        .map(medication_res)
        .collect();
    Json(wire::ListMedicationsRes { medications })
}

#[utoipa::path(
    post,
    path = "/directory/nurses",
    request_body = wire::RegisterPartyReq,
    responses(
        (status = 201, description = "Nurse registered", body = wire::RegisterPartyRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes)
    )
)]
/// Register a nurse in the directory
#[axum::debug_handler]
async fn register_nurse(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<wire::RegisterPartyReq>,
) -> Result<Json<wire::RegisterPartyRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;
    let id = state.service.register_nurse(&req.name).map_err(map_error)?;
    Ok(Json(wire::RegisterPartyRes { id: id.to_string() }))
}

#[utoipa::path(
    post,
    path = "/directory/facilities",
    request_body = wire::RegisterPartyReq,
    responses(
        (status = 201, description = "Facility registered", body = wire::RegisterPartyRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes)
    )
)]
/// Register a facility in the directory
#[axum::debug_handler]
async fn register_facility(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<wire::RegisterPartyReq>,
) -> Result<Json<wire::RegisterPartyRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;
    let id = state
        .service
        .register_facility(&req.name)
        .map_err(map_error)?;
    Ok(Json(wire::RegisterPartyRes { id: id.to_string() }))
}

#[utoipa::path(
    post,
    path = "/directory/patients",
    request_body = wire::RegisterPartyReq,
    responses(
        (status = 201, description = "Patient registered", body = wire::RegisterPartyRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes)
    )
)]
/// Register a patient in the directory
#[axum::debug_handler]
async fn register_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<wire::RegisterPartyReq>,
) -> Result<Json<wire::RegisterPartyRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;
    let id = state
        .service
        .register_patient(&req.name)
        .map_err(map_error)?;
    Ok(Json(wire::RegisterPartyRes { id: id.to_string() }))
}

#[utoipa::path(
    post,
    path = "/inventory",
    request_body = wire::AddInventoryReq,
    responses(
        (status = 201, description = "Stock record created", body = wire::InventoryRecordRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes),
        (status = 401, description = "Unauthorized", body = wire::ErrorRes)
    )
)]
/// Register a stock record for a facility/medication pair
///
/// A pair holds a single record; subsequent intake goes through the restock
/// endpoint.
#[axum::debug_handler]
async fn add_inventory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<wire::AddInventoryReq>,
) -> Result<Json<wire::InventoryRecordRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;

    let facility_id = parse_id(&req.facility_id, "facility")?;
    let medication_id = parse_id(&req.medication_id, "medication")?;
    let expiry_date = req
        .expiry_date
        .as_deref()
        .map(|d| parse_date(d, "expiry"))
        .transpose()?;

    let record = state
        .service
        .add_inventory_record(NewInventoryRecord {
            facility_id,
            medication_id,
            quantity_on_hand: req.quantity_on_hand,
            reorder_level: req.reorder_level,
            unit: req.unit,
            batch_number: req.batch_number,
            expiry_date,
            supplier: req.supplier,
            cost_per_unit: req.cost_per_unit,
        })
        .map_err(map_error)?;

    Ok(Json(inventory_res(record)))
}

#[utoipa::path(
    get,
    path = "/inventory/{facility_id}/{medication_id}",
    responses(
        (status = 200, description = "Stock position for the pair", body = wire::AvailabilityRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes)
    )
)]
/// Read the stock position for a facility/medication pair
///
/// An unstocked pair is a synthetic zero, not an error: the UI renders it as
/// "0 / N/A". The low-stock and expiring-soon flags are derived on every read.
#[axum::debug_handler]
async fn get_availability(
    State(state): State<AppState>,
    AxumPath((facility_id, medication_id)): AxumPath<(String, String)>,
) -> Result<Json<wire::AvailabilityRes>, ApiFailure> {
    let facility_id = parse_id(&facility_id, "facility")?;
    let medication_id = parse_id(&medication_id, "medication")?;

    let availability = state.service.availability(facility_id, medication_id);
    Ok(Json(availability_res(availability)))
}

#[utoipa::path(
    post,
    path = "/inventory/{record_id}/restock",
    request_body = wire::RestockReq,
    responses(
        (status = 200, description = "New stock level", body = wire::RestockRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes),
        (status = 404, description = "Record not found", body = wire::ErrorRes)
    )
)]
/// Add stock to a record
#[axum::debug_handler]
async fn restock(
    State(state): State<AppState>,
    AxumPath(record_id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<wire::RestockReq>,
) -> Result<Json<wire::RestockRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;

    let record_id = parse_id(&record_id, "inventory record")?;
    let quantity_on_hand = state
        .service
        .restock(record_id, req.quantity)
        .map_err(map_error)?;

    Ok(Json(wire::RestockRes {
        record_id: record_id.to_string(),
        quantity_on_hand,
    }))
}

#[utoipa::path(
    post,
    path = "/prescriptions",
    request_body = wire::CreatePrescriptionReq,
    responses(
        (status = 201, description = "Prescription created", body = wire::PrescriptionRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes),
        (status = 401, description = "Unauthorized", body = wire::ErrorRes)
    )
)]
/// Create a prescription
///
/// The response carries the authoritative item ids; clients must use these
/// ids in dispense calls rather than any locally cached medication mapping.
#[axum::debug_handler]
async fn create_prescription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<wire::CreatePrescriptionReq>,
) -> Result<Json<wire::PrescriptionRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;

    let patient_id = parse_id(&req.patient_id, "patient")?;
    let facility_id = parse_id(&req.facility_id, "facility")?;
    let prescriber_id = parse_id(&req.prescriber_id, "prescriber")?;
    let start_date = parse_date(&req.start_date, "start")?;

    let mut items = Vec::with_capacity(req.items.len());
    for item in req.items {
        items.push(NewPrescriptionItem {
            medication_id: parse_id(&item.medication_id, "medication")?,
            dosage: item.dosage,
            frequency: item.frequency,
            quantity: item.quantity,
            duration_days: item.duration_days,
            instructions: item.instructions,
        });
    }

    let prescription = state
        .service
        .create_prescription(NewPrescription {
            patient_id,
            facility_id,
            prescriber_id,
            start_date,
            notes: req.notes,
            items,
        })
        .map_err(map_error)?;

    Ok(Json(prescription_res(prescription)))
}

#[utoipa::path(
    get,
    path = "/prescriptions/{id}",
    responses(
        (status = 200, description = "Prescription with items", body = wire::PrescriptionRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes),
        (status = 404, description = "Prescription not found", body = wire::ErrorRes)
    )
)]
/// Read a prescription with its authoritative item ids
#[axum::debug_handler]
async fn get_prescription(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<wire::PrescriptionRes>, ApiFailure> {
    let id = parse_id(&id, "prescription")?;
    let prescription = state.service.get_prescription(id).map_err(map_error)?;
    Ok(Json(prescription_res(prescription)))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/prescriptions",
    responses(
        (status = 200, description = "Prescriptions for the patient", body = wire::ListPrescriptionsRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes)
    )
)]
/// List a patient's prescriptions
#[axum::debug_handler]
async fn list_patient_prescriptions(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<wire::ListPrescriptionsRes>, ApiFailure> {
    let id = parse_id(&id, "patient")?;
    let prescriptions = state
        .service
        .prescriptions_for_patient(id)
        .into_iter()
        .map(prescription_res)
        .collect();
    Ok(Json(wire::ListPrescriptionsRes { prescriptions }))
}

#[utoipa::path(
    post,
    path = "/prescriptions/{id}/dispense",
    request_body = wire::DispenseReq,
    responses(
        (status = 200, description = "Dispense committed", body = wire::DispenseRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes),
        (status = 401, description = "Unauthorized or unknown care context", body = wire::ErrorRes),
        (status = 404, description = "Prescription not found", body = wire::ErrorRes),
        (status = 409, description = "Stock, ceiling, status or lock conflict", body = wire::ErrorRes)
    )
)]
/// Dispense against a prescription
///
/// All lines commit atomically or not at all. Failures carry itemized detail
/// (medication, requested vs available/remaining) for per-line feedback.
#[axum::debug_handler]
async fn dispense(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<wire::DispenseReq>,
) -> Result<Json<wire::DispenseRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;

    let prescription_id = parse_id(&id, "prescription")?;
    let nurse_id = parse_id(&req.nurse_id, "nurse")?;
    let facility_id = parse_id(&req.facility_id, "facility")?;

    let mut lines = Vec::with_capacity(req.lines.len());
    for line in req.lines {
        lines.push(DispenseRequestLine {
            prescription_item_id: parse_id(&line.prescription_item_id, "prescription item")?,
            quantity_dispensed: line.quantity_dispensed,
            batch_number: line.batch_number,
            notes: line.notes,
        });
    }

    let outcome = state
        .service
        .dispense(DispenseRequest {
            prescription_id,
            nurse_id,
            facility_id,
            lines,
        })
        .map_err(|e| {
            tracing::error!("Dispense error: {:?}", e);
            map_error(e)
        })?;

    Ok(Json(transaction_res(
        outcome.transaction,
        outcome.prescription_status.to_string(),
    )))
}

#[utoipa::path(
    post,
    path = "/prescriptions/{id}/cancel",
    responses(
        (status = 200, description = "Prescription cancelled", body = wire::PrescriptionRes),
        (status = 400, description = "Bad request", body = wire::ErrorRes),
        (status = 404, description = "Prescription not found", body = wire::ErrorRes),
        (status = 409, description = "Prescription already terminal", body = wire::ErrorRes)
    )
)]
/// Administratively cancel a prescription
#[axum::debug_handler]
async fn cancel_prescription(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<wire::PrescriptionRes>, ApiFailure> {
    require_api_key(&headers).map_err(auth_failure)?;

    let id = parse_id(&id, "prescription")?;
    let prescription = state.service.cancel_prescription(id).map_err(map_error)?;
    Ok(Json(prescription_res(prescription)))
}

#[utoipa::path(
    get,
    path = "/audit",
    responses(
        (status = 200, description = "Dispense history ordered by transaction time", body = wire::AuditRes)
    )
)]
/// Read the dispense audit trail
///
/// Append-only history; entries are never updated or deleted.
#[axum::debug_handler]
async fn audit_log(State(state): State<AppState>) -> Json<wire::AuditRes> {
    let transactions = state
        .service
        .audit_log()
        .into_iter()
        .map(|tx| {
            let status = state
                .service
                .get_prescription(tx.prescription_id)
                .map(|p| p.status.to_string())
                .unwrap_or_default();
            transaction_res(tx, status)
        })
        .collect();
    Json(wire::AuditRes { transactions })
}
