use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::error::HttpError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Invalid escrow transition: {0}")]
    InvalidTransition(String),

    #[error("User {0} is not authorized to perform this action on job {1}")]
    NotAuthorized(Uuid, Uuid),

    // Treated as success by callers: the target state was already
    // reached (duplicate webhook, double-click, losing racer).
    #[error("Transition already processed")]
    AlreadyProcessed,

    #[error("Webhook signature verification failed")]
    SignatureVerificationFailed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::JobNotFound(_) | ServiceError::TransactionNotFound(_) => {
                StatusCode::NOT_FOUND
            }

            ServiceError::Validation(_) | ServiceError::InvalidTransition(_) => {
                StatusCode::BAD_REQUEST
            }

            ServiceError::SignatureVerificationFailed => StatusCode::UNAUTHORIZED,

            ServiceError::NotAuthorized(_, _) => StatusCode::FORBIDDEN,

            ServiceError::Gateway(_) => StatusCode::BAD_GATEWAY,

            // Idempotent success from the caller's perspective
            ServiceError::AlreadyProcessed => StatusCode::OK,

            ServiceError::Database(_) | ServiceError::Notification(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        match error {
            ServiceError::JobNotFound(_) | ServiceError::TransactionNotFound(_) => {
                HttpError::not_found(error.to_string())
            }

            ServiceError::Validation(_) | ServiceError::InvalidTransition(_) => {
                HttpError::bad_request(error.to_string())
            }

            ServiceError::SignatureVerificationFailed => {
                HttpError::unauthorized(error.to_string())
            }

            ServiceError::NotAuthorized(_, _) => HttpError::forbidden(error.to_string()),

            ServiceError::Gateway(_) | ServiceError::AlreadyProcessed => {
                HttpError::new(error.to_string(), status)
            }

            _ => HttpError::server_error(error.to_string()),
        }
    }
}
