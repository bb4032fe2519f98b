use http::StatusCode;
use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

/// Message category a caller can phrase an error with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InsufficientStock,
    InvalidTransition,
    AlreadyCompleted,
    DuplicateTransfer,
    OverReceipt,
    DuplicateIdentifier,
    NotFound,
    Validation,
    Infrastructure,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Cannot {action} {entity} while it is {status}{}", .detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default())]
    InvalidTransition {
        entity: &'static str,
        action: &'static str,
        status: String,
        detail: Option<String>,
    },

    #[error("Transfer {0} has already been completed")]
    AlreadyCompleted(Uuid),

    #[error("An unresolved transfer ({existing_id}) already exists for this source, destination and variant")]
    DuplicateTransfer { existing_id: Uuid },

    #[error("Over receipt on line item {line_item_id}: ordered {ordered}, already received {received}, attempted {attempted}")]
    OverReceipt {
        line_item_id: Uuid,
        ordered: i32,
        received: i32,
        attempted: i64,
    },

    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Builds an `InvalidTransition` without extra detail.
    pub fn invalid_transition(
        entity: &'static str,
        action: &'static str,
        status: impl ToString,
    ) -> Self {
        ServiceError::InvalidTransition {
            entity,
            action,
            status: status.to_string(),
            detail: None,
        }
    }

    /// Replaces the detail of an `InvalidTransition`; other variants pass through.
    pub fn with_detail(self, new_detail: impl Into<String>) -> Self {
        match self {
            ServiceError::InvalidTransition {
                entity,
                action,
                status,
                ..
            } => ServiceError::InvalidTransition {
                entity,
                action,
                status,
                detail: Some(new_detail.into()),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::AlreadyCompleted(_) => ErrorKind::AlreadyCompleted,
            Self::DuplicateTransfer { .. } => ErrorKind::DuplicateTransfer,
            Self::OverReceipt { .. } => ErrorKind::OverReceipt,
            Self::DuplicateIdentifier(_) => ErrorKind::DuplicateIdentifier,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidTransition
            | ErrorKind::AlreadyCompleted
            | ErrorKind::DuplicateTransfer
            | ErrorKind::DuplicateIdentifier => StatusCode::CONFLICT,
            ErrorKind::InsufficientStock | ErrorKind::OverReceipt => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message suitable for showing to an operator.
    /// Infrastructure errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}
