//! HTTP handlers for payment type endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::Permission;
use uuid::Uuid;

use super::bank_account::ActiveOnlyQuery;
use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::payment_type::{
    CreatePaymentTypeInput, PaymentType, PaymentTypeService, UpdatePaymentTypeInput,
};
use crate::AppState;

/// List payment types
pub async fn list_payment_types(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ActiveOnlyQuery>,
) -> AppResult<Json<Vec<PaymentType>>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = PaymentTypeService::new(state.db);
    let payment_types = service.list_payment_types(query.active_only).await?;
    Ok(Json(payment_types))
}

/// Create a payment type
pub async fn create_payment_type(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreatePaymentTypeInput>,
) -> AppResult<(StatusCode, Json<PaymentType>)> {
    current_user.0.require(Permission::ManageBankAccounts)?;

    let service = PaymentTypeService::new(state.db);
    let payment_type = service.create_payment_type(input).await?;
    Ok((StatusCode::CREATED, Json(payment_type)))
}

/// Update a payment type
pub async fn update_payment_type(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(payment_type_id): Path<Uuid>,
    Json(input): Json<UpdatePaymentTypeInput>,
) -> AppResult<Json<PaymentType>> {
    current_user.0.require(Permission::ManageBankAccounts)?;

    let service = PaymentTypeService::new(state.db);
    let payment_type = service.update_payment_type(payment_type_id, input).await?;
    Ok(Json(payment_type))
}

/// Deactivate a payment type
pub async fn delete_payment_type(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(payment_type_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    current_user.0.require(Permission::ManageBankAccounts)?;

    let service = PaymentTypeService::new(state.db);
    service.deactivate_payment_type(payment_type_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
