use std::sync::Arc;

use axum::{
    extract::Path,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{escrowdb::EscrowExt, jobdb::JobExt},
    dtos::jobdtos::*,
    error::HttpError,
    middleware::{role_check, JWTAuthMiddeware},
    models::usermodel::UserRole,
    utils::currency::cents_to_dollars,
    AppState,
};

pub fn jobs_handler() -> Router {
    Router::new()
        .route("/:job_id", get(get_job))
        .route("/:job_id/hire", post(hire_provider))
        .route("/:job_id/complete", post(complete_job))
        .route("/:job_id/cancel", post(cancel_job))
        .route("/transactions/:transaction_id/capture", post(capture_payment))
        .route(
            "/transactions/refund",
            post(refund_transaction).layer(middleware::from_fn(|req, next| {
                role_check(req, next, vec![UserRole::Admin])
            })),
        )
}

pub fn provider_handler() -> Router {
    Router::new().route("/earnings", get(get_provider_earnings))
}

pub async fn get_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(_auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let job = app_state
        .db_client
        .get_job_by_id(job_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found(format!("Job {} not found", job_id)))?;

    let response: JobResponseDto = job.into();
    Ok(Json(ApiResponse::success(
        "Job retrieved successfully",
        response,
    )))
}

/// Hire a provider for a job and initiate the escrow charge. The
/// response carries whatever the frontend needs to finish the payment
/// (client secret or approval redirect).
pub async fn hire_provider(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<HireProviderDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let outcome = app_state
        .escrow_service
        .hire_and_charge(job_id, body.provider_id, body.payment_gateway, &auth.user)
        .await?;

    let response = HireResponseDto {
        job: outcome.job.into(),
        transaction: outcome.transaction.into(),
        payment_action: outcome.redirect_or_client_secret,
    };

    Ok(Json(ApiResponse::success(
        "Provider hired, payment initiated",
        response,
    )))
}

/// Synchronous capture for the wallet flow: the frontend calls this
/// after the customer approves the order. The webhook path covers the
/// case where the frontend never comes back.
pub async fn capture_payment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(_auth): Extension<JWTAuthMiddeware>,
    Path(transaction_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let (transaction, job) = app_state
        .escrow_service
        .capture_payment(transaction_id)
        .await?;

    if let Some(fire_at) = job.escrow_end_date {
        app_state.release_scheduler.arm(job.id, fire_at);
    }

    let response = HireResponseDto {
        job: job.into(),
        transaction: transaction.into(),
        payment_action: None,
    };

    Ok(Json(ApiResponse::success(
        "Payment captured, funds in escrow",
        response,
    )))
}

pub async fn complete_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let (transaction, job) = app_state
        .escrow_service
        .complete_job(job_id, &auth.user)
        .await?;

    let response = HireResponseDto {
        job: job.into(),
        transaction: transaction.into(),
        payment_action: None,
    };

    Ok(Json(ApiResponse::success(
        "Job completed, payment released",
        response,
    )))
}

pub async fn cancel_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let job = app_state.escrow_service.cancel_job(job_id, &auth.user).await?;

    let response: JobResponseDto = job.into();
    Ok(Json(ApiResponse::success(
        "Job cancelled successfully",
        response,
    )))
}

pub async fn refund_transaction(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<RefundTransactionDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let (transaction, job) = app_state
        .escrow_service
        .refund_transaction(body.transaction_id, &auth.user)
        .await?;

    let response = HireResponseDto {
        job: job.into(),
        transaction: transaction.into(),
        payment_action: None,
    };

    Ok(Json(ApiResponse::success(
        "Transaction refunded",
        response,
    )))
}

pub async fn get_provider_earnings(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let released = app_state
        .db_client
        .get_released_transactions_for_provider(auth.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let response = ProviderEarningsDto {
        available_balance: cents_to_dollars(auth.user.available_balance_cents),
        total_earnings: cents_to_dollars(auth.user.total_earnings_cents),
        released_transactions: released.into_iter().map(Into::into).collect(),
    };

    Ok(Json(ApiResponse::success(
        "Earnings retrieved successfully",
        response,
    )))
}
