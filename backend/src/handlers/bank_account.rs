//! HTTP handlers for bank account endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shared::Permission;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::bank_account::{
    BankAccount, BankAccountService, CreateBankAccountInput, UpdateBankAccountInput,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ActiveOnlyQuery {
    #[serde(default)]
    pub active_only: bool,
}

/// List bank accounts
pub async fn list_bank_accounts(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ActiveOnlyQuery>,
) -> AppResult<Json<Vec<BankAccount>>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = BankAccountService::new(state.db);
    let accounts = service.list_accounts(query.active_only).await?;
    Ok(Json(accounts))
}

/// Get a bank account
pub async fn get_bank_account(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<BankAccount>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = BankAccountService::new(state.db);
    let account = service.get_account(account_id).await?;
    Ok(Json(account))
}

/// Create a bank account
pub async fn create_bank_account(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateBankAccountInput>,
) -> AppResult<(StatusCode, Json<BankAccount>)> {
    current_user.0.require(Permission::ManageBankAccounts)?;

    let service = BankAccountService::new(state.db);
    let account = service.create_account(current_user.0.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Update a bank account
pub async fn update_bank_account(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(account_id): Path<Uuid>,
    Json(input): Json<UpdateBankAccountInput>,
) -> AppResult<Json<BankAccount>> {
    current_user.0.require(Permission::ManageBankAccounts)?;

    let service = BankAccountService::new(state.db);
    let account = service
        .update_account(current_user.0.user_id, account_id, input)
        .await?;
    Ok(Json(account))
}

/// Deactivate a bank account
pub async fn delete_bank_account(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(account_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    current_user.0.require(Permission::ManageBankAccounts)?;

    let service = BankAccountService::new(state.db);
    service
        .deactivate_account(current_user.0.user_id, account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
