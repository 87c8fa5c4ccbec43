//! HTTP handlers for expiry tracker endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use shared::{ApprovalStatus, ApprovalStep, BatchStatus, PaginatedResponse, Permission};
use uuid::Uuid;

use super::page_params;
use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::expiry::{
    BatchDetail, BatchFilter, CreateBatchInput, ExpiryAction, ExpiryAlert, ExpiryBatch,
    ExpiryService, ExpirySummary, HandleExpiryInput, UpdateBatchInput,
};
use crate::AppState;

/// Query parameters for listing batches
#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub status: Option<BatchStatus>,
    pub approval_status: Option<ApprovalStatus>,
    pub product_id: Option<Uuid>,
    pub expiring_within_days: Option<i32>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, serde::Serialize)]
pub struct MarkExpiredResponse {
    pub updated: u64,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn service(state: &AppState) -> ExpiryService {
    ExpiryService::new(state.db.clone(), state.config.expiry.clone())
}

/// List expiry batches
pub async fn list_batches(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListBatchesQuery>,
) -> AppResult<Json<PaginatedResponse<ExpiryBatch>>> {
    current_user.0.require(Permission::ViewExpiryTracker)?;

    let filter = BatchFilter {
        status: query.status,
        approval_status: query.approval_status,
        product_id: query.product_id,
        expiring_within_days: query.expiring_within_days,
    };
    let pagination = page_params(query.page, query.per_page);

    let batches = service(&state)
        .list_batches(&filter, &pagination, today())
        .await?;
    Ok(Json(batches))
}

/// Record a new batch
pub async fn create_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateBatchInput>,
) -> AppResult<(StatusCode, Json<BatchDetail>)> {
    current_user.0.require(Permission::ManageExpiryTracker)?;

    let batch = service(&state)
        .create_batch(current_user.0.user_id, input, today())
        .await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// Get a batch with its action history
pub async fn get_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<BatchDetail>> {
    current_user.0.require(Permission::ViewExpiryTracker)?;

    let batch = service(&state).get_batch_detail(batch_id).await?;
    Ok(Json(batch))
}

/// Edit a batch
pub async fn update_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
    Json(input): Json<UpdateBatchInput>,
) -> AppResult<Json<BatchDetail>> {
    current_user.0.require(Permission::ManageExpiryTracker)?;

    let batch = service(&state)
        .update_batch(current_user.0.user_id, batch_id, input, today())
        .await?;
    Ok(Json(batch))
}

/// Submit a draft batch for approval
pub async fn submit_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<ExpiryBatch>> {
    current_user.0.require(Permission::ManageExpiryTracker)?;

    let batch = service(&state)
        .transition_approval(current_user.0.user_id, batch_id, ApprovalStep::Submit)
        .await?;
    Ok(Json(batch))
}

/// Approve a submitted batch
pub async fn approve_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<ExpiryBatch>> {
    current_user.0.require(Permission::ApproveExpiryTracker)?;

    let batch = service(&state)
        .transition_approval(current_user.0.user_id, batch_id, ApprovalStep::Approve)
        .await?;
    Ok(Json(batch))
}

/// Send a submitted batch back to draft
pub async fn reject_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<ExpiryBatch>> {
    current_user.0.require(Permission::ApproveExpiryTracker)?;

    let batch = service(&state)
        .transition_approval(current_user.0.user_id, batch_id, ApprovalStep::Reject)
        .await?;
    Ok(Json(batch))
}

/// List actions taken on a batch
pub async fn list_actions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<Vec<ExpiryAction>>> {
    current_user.0.require(Permission::ViewExpiryTracker)?;

    let svc = service(&state);
    svc.get_batch(batch_id).await?;
    let actions = svc.list_actions(batch_id).await?;
    Ok(Json(actions))
}

/// Dispose of, return, discount, donate or recall stock from a batch
pub async fn handle_expiry(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
    Json(input): Json<HandleExpiryInput>,
) -> AppResult<(StatusCode, Json<ExpiryAction>)> {
    current_user.0.require(Permission::ManageExpiryTracker)?;

    let action = service(&state)
        .handle_expiry(current_user.0.user_id, batch_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(action)))
}

/// Batches inside their alert window
pub async fn get_alerts(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<ExpiryAlert>>> {
    current_user.0.require(Permission::ViewExpiryTracker)?;

    let alerts = service(&state).get_alerts(today()).await?;
    Ok(Json(alerts))
}

/// Expiry dashboard figures
pub async fn get_summary(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<ExpirySummary>> {
    current_user.0.require(Permission::ViewExpiryTracker)?;

    let summary = service(&state).get_summary(today()).await?;
    Ok(Json(summary))
}

/// Flag past-date batches as expired
pub async fn mark_expired(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<MarkExpiredResponse>> {
    current_user.0.require(Permission::ManageExpiryTracker)?;

    let updated = service(&state)
        .mark_expired(current_user.0.user_id, today())
        .await?;
    Ok(Json(MarkExpiredResponse { updated }))
}
