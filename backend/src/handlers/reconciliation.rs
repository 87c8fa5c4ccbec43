//! HTTP handlers for reconciliation endpoints

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shared::{PaginatedResponse, Permission, ReconciliationStatus};
use uuid::Uuid;

use super::page_params;
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::services::discrepancy::{
    CreateDiscrepancyInput, Discrepancy, DiscrepancyService, ResolveDiscrepancyInput,
};
use crate::services::matching::{CreateMatchInput, MatchingService, TransactionMatch, UnmatchedSale};
use crate::services::reconciliation::{
    BankTransaction, CompleteReconciliationInput, CreateReconciliationInput, ReconciliationDetail,
    ReconciliationFilter, ReconciliationRecord, ReconciliationService, UpdateStatusInput,
};
use crate::services::statement::{ImportResult, StatementService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListReconciliationsQuery {
    pub bank_account_id: Option<Uuid>,
    pub status: Option<ReconciliationStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BankTransactionsQuery {
    #[serde(default)]
    pub unmatched: bool,
}

/// List reconciliations
pub async fn list_reconciliations(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListReconciliationsQuery>,
) -> AppResult<Json<PaginatedResponse<ReconciliationRecord>>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let filter = ReconciliationFilter {
        bank_account_id: query.bank_account_id,
        status: query.status,
    };
    let pagination = page_params(query.page, query.per_page);

    let service = ReconciliationService::new(state.db);
    let records = service.list_reconciliations(&filter, &pagination).await?;
    Ok(Json(records))
}

/// Start a reconciliation
pub async fn create_reconciliation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateReconciliationInput>,
) -> AppResult<(StatusCode, Json<ReconciliationRecord>)> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let service = ReconciliationService::new(state.db);
    let record = service
        .create_reconciliation(current_user.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Get a reconciliation with its lines, matches and discrepancies
pub async fn get_reconciliation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
) -> AppResult<Json<ReconciliationDetail>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = ReconciliationService::new(state.db);
    let detail = service.get_reconciliation_detail(reconciliation_id).await?;
    Ok(Json(detail))
}

/// Change a reconciliation's status
pub async fn update_status(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
    Json(input): Json<UpdateStatusInput>,
) -> AppResult<Json<ReconciliationRecord>> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let service = ReconciliationService::new(state.db);
    let record = service
        .update_status(current_user.0.user_id, reconciliation_id, input)
        .await?;
    Ok(Json(record))
}

/// Complete a reconciliation
pub async fn complete_reconciliation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
    body: Bytes,
) -> AppResult<Json<ReconciliationRecord>> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let input = parse_complete_body(&body)?;
    let service = ReconciliationService::new(state.db);
    let record = service
        .complete(current_user.0.user_id, reconciliation_id, input)
        .await?;
    Ok(Json(record))
}

/// Completion overrides are optional: an empty body means none, anything
/// else must be a valid JSON object
fn parse_complete_body(body: &[u8]) -> AppResult<CompleteReconciliationInput> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CompleteReconciliationInput::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation("body", format!("Invalid JSON body: {}", e)))
}

/// Upload a CSV bank statement
pub async fn import_statement(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ImportResult>)> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation("file", format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::validation("file", format!("Upload could not be read: {}", e)))?;
        upload = Some((file_name, content_type, bytes.to_vec()));
        break;
    }

    let (file_name, content_type, bytes) =
        upload.ok_or_else(|| AppError::validation("file", "A statement file is required"))?;

    let service = StatementService::new(state.db, state.config.uploads.clone());
    let result = service
        .import_statement(
            current_user.0.user_id,
            reconciliation_id,
            file_name,
            content_type,
            bytes,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Statement lines, optionally only the unmatched ones
pub async fn list_bank_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
    Query(query): Query<BankTransactionsQuery>,
) -> AppResult<Json<Vec<BankTransaction>>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = ReconciliationService::new(state.db);
    service.get_reconciliation(reconciliation_id).await?;
    let transactions = service
        .list_bank_transactions(reconciliation_id, query.unmatched)
        .await?;
    Ok(Json(transactions))
}

/// POS sales in the period that are not matched yet
pub async fn list_unmatched_sales(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
) -> AppResult<Json<Vec<UnmatchedSale>>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = MatchingService::new(state.db);
    let sales = service.list_unmatched_sales(reconciliation_id).await?;
    Ok(Json(sales))
}

pub async fn list_matches(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
) -> AppResult<Json<Vec<TransactionMatch>>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = MatchingService::new(state.db);
    let matches = service.list_matches(reconciliation_id).await?;
    Ok(Json(matches))
}

/// Match a bank line to a sale
pub async fn create_match(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
    Json(input): Json<CreateMatchInput>,
) -> AppResult<(StatusCode, Json<TransactionMatch>)> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let service = MatchingService::new(state.db);
    let created = service
        .create_match(current_user.0.user_id, reconciliation_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Undo a match
pub async fn delete_match(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((reconciliation_id, match_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let service = MatchingService::new(state.db);
    service
        .delete_match(current_user.0.user_id, reconciliation_id, match_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_discrepancies(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
) -> AppResult<Json<Vec<Discrepancy>>> {
    current_user.0.require(Permission::ViewReconciliation)?;

    let service = DiscrepancyService::new(state.db);
    let discrepancies = service.list_discrepancies(reconciliation_id).await?;
    Ok(Json(discrepancies))
}

/// Record a discrepancy
pub async fn create_discrepancy(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reconciliation_id): Path<Uuid>,
    Json(input): Json<CreateDiscrepancyInput>,
) -> AppResult<(StatusCode, Json<Discrepancy>)> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let service = DiscrepancyService::new(state.db);
    let discrepancy = service
        .create_discrepancy(current_user.0.user_id, reconciliation_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(discrepancy)))
}

/// Resolve a discrepancy
pub async fn resolve_discrepancy(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((reconciliation_id, discrepancy_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<ResolveDiscrepancyInput>,
) -> AppResult<Json<Discrepancy>> {
    current_user.0.require(Permission::ManageReconciliation)?;

    let service = DiscrepancyService::new(state.db);
    let discrepancy = service
        .resolve_discrepancy(current_user.0.user_id, reconciliation_id, discrepancy_id, input)
        .await?;
    Ok(Json(discrepancy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_empty_complete_body_means_no_overrides() {
        for body in [&b""[..], &b"  \n"[..]] {
            let input = parse_complete_body(body).unwrap();
            assert_eq!(input.closing_balance, None);
            assert_eq!(input.notes, None);
        }
    }

    #[test]
    fn test_complete_body_carries_closing_balance() {
        let input = parse_complete_body(br#"{"closing_balance": "1250.75"}"#).unwrap();
        assert_eq!(input.closing_balance, Some(Decimal::new(125075, 2)));
    }

    #[test]
    fn test_malformed_complete_body_rejected() {
        for body in [
            &br#"{"closing_balance": "12.5"#[..],
            &br#"{"closing_balance": "abc"}"#[..],
        ] {
            assert!(matches!(
                parse_complete_body(body),
                Err(AppError::Validation { ref field, .. }) if field == "body"
            ));
        }
    }
}
