//! Expiry tracker service: product batches, expiry actions and alerts

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{
    alert_level, apply_expiry_action, days_until_expiry, validate_against_product_stock,
    validate_alert_days, validate_batch_quantity, validate_expiry_in_future,
    validate_manufacturing_date, validate_non_negative, validate_remaining_quantity,
    value_at_risk, AlertLevel, ApprovalStatus, ApprovalStep, BatchStatus, ExpiryActionError,
    ExpiryActionType, PaginatedResponse, Pagination,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::config::ExpiryConfig;
use crate::error::{AppError, AppResult, ValidationCollector};
use crate::services::activity::{self, ActivityLog};

const ENTITY_BATCH: &str = "product_expiry_batch";

const BATCH_COLUMNS: &str = r#"
    b.id, b.product_id, p.name AS product_name, b.batch_number, b.manufacturing_date,
    b.expiry_date, b.quantity, b.remaining_quantity, b.unit_cost, b.supplier_name,
    b.status, b.approval_status, b.alert_days_before, b.stock_added, b.notes,
    b.created_by, b.approved_by, b.approved_at, b.created_at, b.updated_at
"#;

/// Expiry service for managing batches and the actions taken on them
#[derive(Clone)]
pub struct ExpiryService {
    db: PgPool,
    config: ExpiryConfig,
}

/// A product batch with its expiry data
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExpiryBatch {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub batch_number: String,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
    pub remaining_quantity: i32,
    pub unit_cost: Decimal,
    pub supplier_name: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: BatchStatus,
    #[sqlx(try_from = "String")]
    pub approval_status: ApprovalStatus,
    pub alert_days_before: i32,
    pub stock_added: bool,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Action recorded against a batch
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExpiryAction {
    pub id: Uuid,
    pub batch_id: Uuid,
    #[sqlx(try_from = "String")]
    pub action_type: ExpiryActionType,
    pub quantity_affected: i32,
    pub cost: Decimal,
    pub revenue: Decimal,
    pub disposal_method: Option<String>,
    pub return_reference: Option<String>,
    pub reason: String,
    pub performed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Batch with its action history and audit trail
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: ExpiryBatch,
    pub actions: Vec<ExpiryAction>,
    pub activity: Vec<ActivityLog>,
}

/// Input for creating a batch
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchInput {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Batch number must be 1 to 100 characters"))]
    pub batch_number: String,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
    pub remaining_quantity: Option<i32>,
    pub unit_cost: Option<Decimal>,
    #[validate(length(max = 200, message = "Supplier name must be at most 200 characters"))]
    pub supplier_name: Option<String>,
    pub alert_days_before: Option<i32>,
    /// Add the batch quantity to the product's inventory count
    #[serde(default)]
    pub add_to_stock: bool,
    /// Create the batch already submitted for approval
    #[serde(default)]
    pub submit: bool,
    pub notes: Option<String>,
}

/// Input for updating a batch
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateBatchInput {
    #[validate(length(min = 1, max = 100, message = "Batch number must be 1 to 100 characters"))]
    pub batch_number: Option<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: Option<i32>,
    pub remaining_quantity: Option<i32>,
    pub unit_cost: Option<Decimal>,
    #[validate(length(max = 200, message = "Supplier name must be at most 200 characters"))]
    pub supplier_name: Option<String>,
    pub alert_days_before: Option<i32>,
    pub notes: Option<String>,
}

/// Input for handling expiring stock
#[derive(Debug, Deserialize, Validate)]
pub struct HandleExpiryInput {
    pub action_type: ExpiryActionType,
    pub quantity_affected: i32,
    #[validate(length(min = 1, max = 1000, message = "A reason is required"))]
    pub reason: String,
    pub cost: Option<Decimal>,
    pub revenue: Option<Decimal>,
    #[validate(length(max = 100, message = "Disposal method must be at most 100 characters"))]
    pub disposal_method: Option<String>,
    #[validate(length(max = 100, message = "Return reference must be at most 100 characters"))]
    pub return_reference: Option<String>,
}

/// Filters for listing batches
#[derive(Debug, Default, Deserialize)]
pub struct BatchFilter {
    pub status: Option<BatchStatus>,
    pub approval_status: Option<ApprovalStatus>,
    pub product_id: Option<Uuid>,
    pub expiring_within_days: Option<i32>,
}

/// A batch inside its alert window
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryAlert {
    #[serde(flatten)]
    pub batch: ExpiryBatch,
    pub days_until_expiry: i64,
    pub level: AlertLevel,
    pub value_at_risk: Decimal,
}

/// Batch count for one status
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusCount {
    pub status: String,
    pub batch_count: i64,
}

/// Dashboard figures for the expiry tracker
#[derive(Debug, Clone, Serialize)]
pub struct ExpirySummary {
    pub by_status: Vec<StatusCount>,
    pub expired_alerts: usize,
    pub critical_alerts: usize,
    pub warning_alerts: usize,
    pub value_at_risk: Decimal,
    pub total_loss: Decimal,
}

/// The date and quantity fields every batch must satisfy together
#[derive(Debug, Clone, Copy)]
pub struct BatchFields {
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
    pub remaining_quantity: i32,
    pub unit_cost: Decimal,
    pub alert_days_before: i32,
}

/// Check a batch's fields, recording every failure in `collector`.
/// The future-expiry rule only applies when the expiry date is being set.
pub fn check_batch_fields(
    fields: &BatchFields,
    today: NaiveDate,
    expiry_date_changed: bool,
    collector: &mut ValidationCollector,
) {
    if expiry_date_changed {
        collector.check("expiry_date", validate_expiry_in_future(fields.expiry_date, today));
    }
    if let Some(mfg) = fields.manufacturing_date {
        collector.check(
            "manufacturing_date",
            validate_manufacturing_date(mfg, fields.expiry_date, today),
        );
    }
    collector.check("quantity", validate_batch_quantity(fields.quantity));
    collector.check(
        "remaining_quantity",
        validate_remaining_quantity(fields.remaining_quantity, fields.quantity),
    );
    collector.check("unit_cost", validate_non_negative(fields.unit_cost));
    collector.check("alert_days_before", validate_alert_days(fields.alert_days_before));
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// Check the action-specific fields of an expiry action form
pub fn check_action_fields(input: &HandleExpiryInput, collector: &mut ValidationCollector) {
    collector.absorb(input.validate());
    if input.quantity_affected <= 0 {
        collector.push("quantity_affected", "Quantity affected must be greater than 0");
    }
    if input.reason.trim().is_empty() {
        collector.push("reason", "A reason is required");
    }
    if let Some(cost) = input.cost {
        collector.check("cost", validate_non_negative(cost));
    }
    if let Some(revenue) = input.revenue {
        collector.check("revenue", validate_non_negative(revenue));
    }
    if input.action_type.requires_return_reference() && !non_blank(&input.return_reference) {
        collector.push("return_reference", "A return reference is required for returns");
    }
    if input.action_type.requires_disposal_method() && !non_blank(&input.disposal_method) {
        collector.push("disposal_method", "A disposal method is required for disposals");
    }
}

#[derive(Debug, FromRow)]
struct ProductRow {
    quantity: i32,
    unit_cost: Decimal,
}

#[derive(Debug, FromRow)]
struct LockedBatchRow {
    product_id: Uuid,
    #[sqlx(try_from = "String")]
    status: BatchStatus,
    remaining_quantity: i32,
    unit_cost: Decimal,
}

impl ExpiryService {
    /// Create a new ExpiryService instance
    pub fn new(db: PgPool, config: ExpiryConfig) -> Self {
        Self { db, config }
    }

    /// Record a new batch, optionally adding it to the product's stock
    pub async fn create_batch(
        &self,
        user_id: Uuid,
        input: CreateBatchInput,
        today: NaiveDate,
    ) -> AppResult<BatchDetail> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());

        let product = sqlx::query_as::<_, ProductRow>(
            "SELECT quantity, unit_cost FROM products WHERE id = $1",
        )
        .bind(input.product_id)
        .fetch_optional(&self.db)
        .await?;

        let fields = BatchFields {
            manufacturing_date: input.manufacturing_date,
            expiry_date: input.expiry_date,
            quantity: input.quantity,
            remaining_quantity: input.remaining_quantity.unwrap_or(input.quantity),
            unit_cost: input
                .unit_cost
                .or(product.as_ref().map(|p| p.unit_cost))
                .unwrap_or(Decimal::ZERO),
            alert_days_before: input
                .alert_days_before
                .unwrap_or(self.config.default_alert_days),
        };
        check_batch_fields(&fields, today, true, &mut collector);

        match &product {
            None => collector.push("product_id", "Product does not exist"),
            Some(product) if !input.add_to_stock => collector.check(
                "quantity",
                validate_against_product_stock(fields.quantity, product.quantity),
            ),
            Some(_) => {}
        }
        collector.finish()?;

        let approval_status = if input.submit {
            ApprovalStatus::Submitted
        } else {
            ApprovalStatus::Draft
        };

        let mut tx = self.db.begin().await?;

        let batch_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO product_expiry_batches (
                product_id, batch_number, manufacturing_date, expiry_date, quantity,
                remaining_quantity, unit_cost, supplier_name, status, approval_status,
                alert_days_before, stock_added, notes, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(input.product_id)
        .bind(input.batch_number.trim())
        .bind(fields.manufacturing_date)
        .bind(fields.expiry_date)
        .bind(fields.quantity)
        .bind(fields.remaining_quantity)
        .bind(fields.unit_cost)
        .bind(&input.supplier_name)
        .bind(BatchStatus::Active.as_str())
        .bind(approval_status.as_str())
        .bind(fields.alert_days_before)
        .bind(input.add_to_stock)
        .bind(&input.notes)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if input.add_to_stock {
            sqlx::query(
                "UPDATE products SET quantity = quantity + $1, updated_at = NOW() WHERE id = $2",
            )
            .bind(fields.quantity)
            .bind(input.product_id)
            .execute(&mut *tx)
            .await?;
        }

        activity::record(
            &mut tx,
            user_id,
            "create_expiry_batch",
            ENTITY_BATCH,
            Some(batch_id),
            json!({
                "batch_number": input.batch_number.trim(),
                "quantity": fields.quantity,
                "expiry_date": fields.expiry_date,
                "stock_added": input.add_to_stock,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%batch_id, product_id = %input.product_id, "expiry batch created");

        self.get_batch_detail(batch_id).await
    }

    /// Edit a batch that has not been approved or closed
    pub async fn update_batch(
        &self,
        user_id: Uuid,
        batch_id: Uuid,
        input: UpdateBatchInput,
        today: NaiveDate,
    ) -> AppResult<BatchDetail> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());

        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_as::<_, ExpiryBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM product_expiry_batches b \
             JOIN products p ON p.id = b.product_id \
             WHERE b.id = $1 FOR UPDATE OF b"
        ))
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Expiry batch".to_string()))?;

        if !existing.approval_status.is_editable() {
            return Err(AppError::InvalidStateTransition(
                "Approved batches cannot be edited".to_string(),
            ));
        }
        if existing.status.is_closed() {
            return Err(AppError::InvalidStateTransition(format!(
                "Batch is {} and can no longer be edited",
                existing.status
            )));
        }

        let fields = BatchFields {
            manufacturing_date: input.manufacturing_date.or(existing.manufacturing_date),
            expiry_date: input.expiry_date.unwrap_or(existing.expiry_date),
            quantity: input.quantity.unwrap_or(existing.quantity),
            remaining_quantity: input
                .remaining_quantity
                .unwrap_or(existing.remaining_quantity),
            unit_cost: input.unit_cost.unwrap_or(existing.unit_cost),
            alert_days_before: input
                .alert_days_before
                .unwrap_or(existing.alert_days_before),
        };
        check_batch_fields(&fields, today, input.expiry_date.is_some(), &mut collector);

        if !existing.stock_added && input.quantity.is_some() {
            let product_quantity = sqlx::query_scalar::<_, i32>(
                "SELECT quantity FROM products WHERE id = $1",
            )
            .bind(existing.product_id)
            .fetch_one(&mut *tx)
            .await?;
            collector.check(
                "quantity",
                validate_against_product_stock(fields.quantity, product_quantity),
            );
        }
        collector.finish()?;

        let batch_number = input
            .batch_number
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.batch_number)
            .to_string();
        let supplier_name = input.supplier_name.or(existing.supplier_name);
        let notes = input.notes.or(existing.notes);

        sqlx::query(
            r#"
            UPDATE product_expiry_batches
            SET batch_number = $1, manufacturing_date = $2, expiry_date = $3, quantity = $4,
                remaining_quantity = $5, unit_cost = $6, supplier_name = $7,
                alert_days_before = $8, notes = $9, updated_at = NOW()
            WHERE id = $10
            "#,
        )
        .bind(&batch_number)
        .bind(fields.manufacturing_date)
        .bind(fields.expiry_date)
        .bind(fields.quantity)
        .bind(fields.remaining_quantity)
        .bind(fields.unit_cost)
        .bind(&supplier_name)
        .bind(fields.alert_days_before)
        .bind(&notes)
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        // Stock-adding batches carry their quantity change through to the product
        let quantity_diff = fields.quantity - existing.quantity;
        if existing.stock_added && quantity_diff != 0 {
            sqlx::query(
                "UPDATE products SET quantity = GREATEST(quantity + $1, 0), updated_at = NOW() WHERE id = $2",
            )
            .bind(quantity_diff)
            .bind(existing.product_id)
            .execute(&mut *tx)
            .await?;
        }

        activity::record(
            &mut tx,
            user_id,
            "update_expiry_batch",
            ENTITY_BATCH,
            Some(batch_id),
            json!({
                "quantity": { "from": existing.quantity, "to": fields.quantity },
                "remaining_quantity": {
                    "from": existing.remaining_quantity,
                    "to": fields.remaining_quantity
                },
                "expiry_date": { "from": existing.expiry_date, "to": fields.expiry_date },
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%batch_id, "expiry batch updated");

        self.get_batch_detail(batch_id).await
    }

    /// Move a batch through the approval workflow
    pub async fn transition_approval(
        &self,
        user_id: Uuid,
        batch_id: Uuid,
        step: ApprovalStep,
    ) -> AppResult<ExpiryBatch> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_scalar::<_, String>(
            "SELECT approval_status FROM product_expiry_batches WHERE id = $1 FOR UPDATE",
        )
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Expiry batch".to_string()))?;

        let current: ApprovalStatus = current
            .parse()
            .map_err(|e: shared::ParseEnumError| AppError::Internal(e.to_string()))?;
        let next = current
            .apply(step)
            .map_err(AppError::InvalidStateTransition)?;

        let approver = (next == ApprovalStatus::Approved).then_some(user_id);
        sqlx::query(
            r#"
            UPDATE product_expiry_batches
            SET approval_status = $1,
                approved_by = $2,
                approved_at = CASE WHEN $2::uuid IS NULL THEN NULL ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(next.as_str())
        .bind(approver)
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            &format!("{}_expiry_batch", step.as_str()),
            ENTITY_BATCH,
            Some(batch_id),
            json!({ "from": current, "to": next }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%batch_id, from = current.as_str(), to = next.as_str(), "batch approval changed");

        self.get_batch(batch_id).await
    }

    /// Get a single batch
    pub async fn get_batch(&self, batch_id: Uuid) -> AppResult<ExpiryBatch> {
        sqlx::query_as::<_, ExpiryBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM product_expiry_batches b \
             JOIN products p ON p.id = b.product_id \
             WHERE b.id = $1"
        ))
        .bind(batch_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Expiry batch".to_string()))
    }

    /// Get a batch with its actions and audit trail
    pub async fn get_batch_detail(&self, batch_id: Uuid) -> AppResult<BatchDetail> {
        let batch = self.get_batch(batch_id).await?;
        let actions = self.list_actions(batch_id).await?;
        let activity = activity::list_for_entity(&self.db, ENTITY_BATCH, batch_id, 50).await?;

        Ok(BatchDetail {
            batch,
            actions,
            activity,
        })
    }

    /// List batches matching `filter`, one page at a time
    pub async fn list_batches(
        &self,
        filter: &BatchFilter,
        pagination: &Pagination,
        today: NaiveDate,
    ) -> AppResult<PaginatedResponse<ExpiryBatch>> {
        const FILTER: &str = r#"
            WHERE ($1::text IS NULL OR b.status = $1)
              AND ($2::text IS NULL OR b.approval_status = $2)
              AND ($3::uuid IS NULL OR b.product_id = $3)
              AND ($4::int IS NULL OR b.expiry_date <= $5::date + $4::int)
        "#;

        let status = filter.status.map(|s| s.as_str());
        let approval_status = filter.approval_status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM product_expiry_batches b {FILTER}"
        ))
        .bind(status)
        .bind(approval_status)
        .bind(filter.product_id)
        .bind(filter.expiring_within_days)
        .bind(today)
        .fetch_one(&self.db)
        .await?;

        let batches = sqlx::query_as::<_, ExpiryBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM product_expiry_batches b \
             JOIN products p ON p.id = b.product_id \
             {FILTER} \
             ORDER BY b.expiry_date ASC, b.created_at DESC \
             LIMIT $6 OFFSET $7"
        ))
        .bind(status)
        .bind(approval_status)
        .bind(filter.product_id)
        .bind(filter.expiring_within_days)
        .bind(today)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(batches, pagination, total.max(0) as u64))
    }

    /// Record a disposal/return/discount/donation/recall against a batch
    pub async fn handle_expiry(
        &self,
        user_id: Uuid,
        batch_id: Uuid,
        input: HandleExpiryInput,
    ) -> AppResult<ExpiryAction> {
        let mut collector = ValidationCollector::new();
        check_action_fields(&input, &mut collector);
        collector.finish()?;

        let mut tx = self.db.begin().await?;

        let batch = sqlx::query_as::<_, LockedBatchRow>(
            r#"
            SELECT product_id, status, remaining_quantity, unit_cost
            FROM product_expiry_batches
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Expiry batch".to_string()))?;

        let outcome = apply_expiry_action(
            batch.status,
            batch.remaining_quantity,
            input.action_type,
            input.quantity_affected,
        )
        .map_err(|e| match e {
            ExpiryActionError::BatchClosed(_) => AppError::InvalidStateTransition(e.to_string()),
            ExpiryActionError::ExceedsRemaining { .. } => AppError::InsufficientQuantity(e.to_string()),
            ExpiryActionError::NonPositiveQuantity => {
                AppError::validation("quantity_affected", e.to_string())
            }
        })?;

        let cost = input
            .cost
            .unwrap_or_else(|| Decimal::from(input.quantity_affected) * batch.unit_cost);
        let revenue = input.revenue.unwrap_or(Decimal::ZERO);

        let action = sqlx::query_as::<_, ExpiryAction>(
            r#"
            INSERT INTO expiry_actions (
                batch_id, action_type, quantity_affected, cost, revenue,
                disposal_method, return_reference, reason, performed_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, batch_id, action_type, quantity_affected, cost, revenue,
                      disposal_method, return_reference, reason, performed_by, created_at
            "#,
        )
        .bind(batch_id)
        .bind(input.action_type.as_str())
        .bind(input.quantity_affected)
        .bind(cost)
        .bind(revenue)
        .bind(&input.disposal_method)
        .bind(&input.return_reference)
        .bind(input.reason.trim())
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE product_expiry_batches
            SET remaining_quantity = $1, status = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(outcome.remaining_quantity)
        .bind(outcome.status.as_str())
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE products SET quantity = GREATEST(quantity - $1, 0), updated_at = NOW() WHERE id = $2",
        )
        .bind(input.quantity_affected)
        .bind(batch.product_id)
        .execute(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "handle_expiry",
            ENTITY_BATCH,
            Some(batch_id),
            json!({
                "action_id": action.id,
                "action_type": input.action_type,
                "quantity_affected": input.quantity_affected,
                "remaining_quantity": outcome.remaining_quantity,
                "status": outcome.status,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            %batch_id,
            action_type = input.action_type.as_str(),
            quantity = input.quantity_affected,
            status = outcome.status.as_str(),
            "expiry action recorded"
        );

        Ok(action)
    }

    /// Actions recorded against a batch, newest first
    pub async fn list_actions(&self, batch_id: Uuid) -> AppResult<Vec<ExpiryAction>> {
        let actions = sqlx::query_as::<_, ExpiryAction>(
            r#"
            SELECT id, batch_id, action_type, quantity_affected, cost, revenue,
                   disposal_method, return_reference, reason, performed_by, created_at
            FROM expiry_actions
            WHERE batch_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.db)
        .await?;

        Ok(actions)
    }

    /// Active batches with stock left that are inside their alert window
    pub async fn get_alerts(&self, today: NaiveDate) -> AppResult<Vec<ExpiryAlert>> {
        let batches = sqlx::query_as::<_, ExpiryBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM product_expiry_batches b \
             JOIN products p ON p.id = b.product_id \
             WHERE b.status = 'active' \
               AND b.remaining_quantity > 0 \
               AND b.expiry_date <= $1::date + b.alert_days_before \
             ORDER BY b.expiry_date ASC"
        ))
        .bind(today)
        .fetch_all(&self.db)
        .await?;

        Ok(batches
            .into_iter()
            .filter_map(|batch| self.to_alert(batch, today))
            .collect())
    }

    fn to_alert(&self, batch: ExpiryBatch, today: NaiveDate) -> Option<ExpiryAlert> {
        let days = days_until_expiry(batch.expiry_date, today);
        let level = alert_level(days, batch.alert_days_before, self.config.critical_days)?;
        Some(ExpiryAlert {
            days_until_expiry: days,
            level,
            value_at_risk: value_at_risk(batch.remaining_quantity, batch.unit_cost),
            batch,
        })
    }

    /// Flag active batches whose expiry date has passed
    pub async fn mark_expired(&self, user_id: Uuid, today: NaiveDate) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE product_expiry_batches
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'active' AND expiry_date < $1
            "#,
        )
        .bind(today)
        .execute(&mut *tx)
        .await?;

        let updated = result.rows_affected();
        if updated > 0 {
            activity::record(
                &mut tx,
                user_id,
                "mark_batches_expired",
                ENTITY_BATCH,
                None,
                json!({ "batches": updated, "as_of": today }),
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(updated, "expired batches flagged");

        Ok(updated)
    }

    /// Counts and totals for the expiry dashboard
    pub async fn get_summary(&self, today: NaiveDate) -> AppResult<ExpirySummary> {
        let by_status = sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT status, COUNT(*) AS batch_count
            FROM product_expiry_batches
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let total_loss = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(cost - revenue), 0) FROM expiry_actions",
        )
        .fetch_one(&self.db)
        .await?;

        let alerts = self.get_alerts(today).await?;
        let count = |level: AlertLevel| alerts.iter().filter(|a| a.level == level).count();

        Ok(ExpirySummary {
            by_status,
            expired_alerts: count(AlertLevel::Expired),
            critical_alerts: count(AlertLevel::Critical),
            warning_alerts: count(AlertLevel::Warning),
            value_at_risk: alerts.iter().map(|a| a.value_at_risk).sum(),
            total_loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fields() -> BatchFields {
        BatchFields {
            manufacturing_date: Some(date(2025, 1, 1)),
            expiry_date: date(2025, 12, 31),
            quantity: 100,
            remaining_quantity: 100,
            unit_cost: Decimal::new(350, 2),
            alert_days_before: 30,
        }
    }

    fn failed_fields(collector: ValidationCollector) -> Vec<String> {
        match collector.finish() {
            Ok(()) => Vec::new(),
            Err(AppError::ValidationErrors(errors)) => {
                errors.into_iter().map(|e| e.field).collect()
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_valid_batch_passes() {
        let mut collector = ValidationCollector::new();
        check_batch_fields(&fields(), date(2025, 6, 1), true, &mut collector);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_past_expiry_rejected() {
        let mut collector = ValidationCollector::new();
        let mut f = fields();
        f.expiry_date = date(2025, 5, 1);
        check_batch_fields(&f, date(2025, 6, 1), true, &mut collector);
        assert_eq!(failed_fields(collector), vec!["expiry_date"]);
    }

    #[test]
    fn test_past_expiry_allowed_when_unchanged() {
        let mut collector = ValidationCollector::new();
        let mut f = fields();
        f.expiry_date = date(2025, 5, 1);
        check_batch_fields(&f, date(2025, 6, 1), false, &mut collector);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_every_failure_collected() {
        let mut collector = ValidationCollector::new();
        let f = BatchFields {
            manufacturing_date: Some(date(2026, 1, 1)),
            expiry_date: date(2025, 5, 1),
            quantity: 0,
            remaining_quantity: 5,
            unit_cost: Decimal::new(-1, 0),
            alert_days_before: 400,
        };
        check_batch_fields(&f, date(2025, 6, 1), true, &mut collector);
        assert_eq!(
            failed_fields(collector),
            vec![
                "expiry_date",
                "manufacturing_date",
                "quantity",
                "remaining_quantity",
                "unit_cost",
                "alert_days_before"
            ]
        );
    }

    fn action(action_type: ExpiryActionType) -> HandleExpiryInput {
        HandleExpiryInput {
            action_type,
            quantity_affected: 5,
            reason: "Past best-before".to_string(),
            cost: None,
            revenue: None,
            disposal_method: None,
            return_reference: None,
        }
    }

    #[test]
    fn test_disposal_requires_method() {
        let mut collector = ValidationCollector::new();
        check_action_fields(&action(ExpiryActionType::Disposal), &mut collector);
        assert_eq!(failed_fields(collector), vec!["disposal_method"]);
    }

    #[test]
    fn test_return_requires_reference() {
        let mut collector = ValidationCollector::new();
        let mut input = action(ExpiryActionType::Return);
        input.return_reference = Some("  ".to_string());
        check_action_fields(&input, &mut collector);
        assert_eq!(failed_fields(collector), vec!["return_reference"]);
    }

    #[test]
    fn test_discount_with_negative_revenue() {
        let mut collector = ValidationCollector::new();
        let mut input = action(ExpiryActionType::Discount);
        input.revenue = Some(Decimal::new(-500, 2));
        check_action_fields(&input, &mut collector);
        assert_eq!(failed_fields(collector), vec!["revenue"]);
    }

    #[test]
    fn test_blank_reason_rejected() {
        let mut collector = ValidationCollector::new();
        let mut input = action(ExpiryActionType::Donation);
        input.reason = "   ".to_string();
        check_action_fields(&input, &mut collector);
        assert_eq!(failed_fields(collector), vec!["reason"]);
    }
}
