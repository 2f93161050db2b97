use crate::prescription::PrescriptionStatus;
use rx_id::EntityId;

/// The dispensing error taxonomy.
///
/// Validation and reference errors are raised before any inventory access and
/// therefore never leave side effects. Stock, over-dispense and concurrency
/// errors are raised inside the commit critical section and force a full
/// rollback of the dispense transaction.
#[derive(Debug, thiserror::Error)]
pub enum DispenseError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("prescription item {item_id} does not belong to prescription {prescription_id}")]
    ReferenceMismatch {
        prescription_id: EntityId,
        item_id: EntityId,
    },
    #[error("insufficient stock of {medication}: requested {requested}, available {available}")]
    InsufficientStock {
        medication: String,
        requested: u32,
        available: u32,
    },
    #[error(
        "over-dispense of {medication}: requested {requested}, {remaining} remaining on prescription"
    )]
    OverDispense {
        medication: String,
        requested: u32,
        remaining: u32,
    },
    #[error("prescription {prescription_id} is {status} and cannot be dispensed")]
    Transition {
        prescription_id: EntityId,
        status: PrescriptionStatus,
    },
    #[error("inventory records are contended, dispense aborted after retry")]
    ConcurrencyConflict,
    #[error("unresolvable care context: {0}")]
    AuthContext(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl From<rx_id::IdError> for DispenseError {
    fn from(err: rx_id::IdError) -> Self {
        DispenseError::Validation(err.to_string())
    }
}

impl From<rx_types::TextError> for DispenseError {
    fn from(err: rx_types::TextError) -> Self {
        DispenseError::Validation(err.to_string())
    }
}

impl From<rx_types::QuantityError> for DispenseError {
    fn from(err: rx_types::QuantityError) -> Self {
        DispenseError::Validation(err.to_string())
    }
}

pub type DispenseResult<T> = std::result::Result<T, DispenseError>;
