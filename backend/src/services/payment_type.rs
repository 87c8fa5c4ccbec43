//! Payment type lookup table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{validate_hex_color, validate_payment_type_code};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult, ValidationCollector};

const PAYMENT_TYPE_COLUMNS: &str = r#"
    id, code, display_name, icon, color, bank_account_id, is_active, sort_order,
    created_at, updated_at
"#;

#[derive(Clone)]
pub struct PaymentTypeService {
    db: PgPool,
}

/// Payment method offered at the till
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentType {
    pub id: Uuid,
    pub code: String,
    pub display_name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub bank_account_id: Option<Uuid>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentTypeInput {
    pub code: String,
    #[validate(length(min = 1, max = 100, message = "Display name is required"))]
    pub display_name: String,
    #[validate(length(max = 50, message = "Icon must be at most 50 characters"))]
    pub icon: Option<String>,
    pub color: Option<String>,
    pub bank_account_id: Option<Uuid>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdatePaymentTypeInput {
    #[validate(length(min = 1, max = 100, message = "Display name is required"))]
    pub display_name: Option<String>,
    #[validate(length(max = 50, message = "Icon must be at most 50 characters"))]
    pub icon: Option<String>,
    pub color: Option<String>,
    pub bank_account_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
}

impl PaymentTypeService {
    /// Create a new PaymentTypeService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_payment_types(&self, active_only: bool) -> AppResult<Vec<PaymentType>> {
        let payment_types = sqlx::query_as::<_, PaymentType>(&format!(
            "SELECT {PAYMENT_TYPE_COLUMNS} FROM payment_types \
             WHERE ($1 = FALSE OR is_active = TRUE) \
             ORDER BY sort_order ASC, display_name ASC"
        ))
        .bind(active_only)
        .fetch_all(&self.db)
        .await?;

        Ok(payment_types)
    }

    pub async fn get_payment_type(&self, payment_type_id: Uuid) -> AppResult<PaymentType> {
        sqlx::query_as::<_, PaymentType>(&format!(
            "SELECT {PAYMENT_TYPE_COLUMNS} FROM payment_types WHERE id = $1"
        ))
        .bind(payment_type_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment type".to_string()))
    }

    pub async fn create_payment_type(&self, input: CreatePaymentTypeInput) -> AppResult<PaymentType> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());
        collector.check("code", validate_payment_type_code(&input.code));
        if let Some(color) = &input.color {
            collector.check("color", validate_hex_color(color));
        }
        collector.finish()?;

        let payment_type = sqlx::query_as::<_, PaymentType>(&format!(
            "INSERT INTO payment_types (code, display_name, icon, color, bank_account_id, sort_order) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {PAYMENT_TYPE_COLUMNS}"
        ))
        .bind(&input.code)
        .bind(input.display_name.trim())
        .bind(&input.icon)
        .bind(&input.color)
        .bind(input.bank_account_id)
        .bind(input.sort_order.unwrap_or(0))
        .fetch_one(&self.db)
        .await?;

        tracing::info!(payment_type_id = %payment_type.id, code = %payment_type.code, "payment type created");

        Ok(payment_type)
    }

    pub async fn update_payment_type(
        &self,
        payment_type_id: Uuid,
        input: UpdatePaymentTypeInput,
    ) -> AppResult<PaymentType> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());
        if let Some(color) = &input.color {
            collector.check("color", validate_hex_color(color));
        }
        collector.finish()?;

        let existing = self.get_payment_type(payment_type_id).await?;

        let payment_type = sqlx::query_as::<_, PaymentType>(&format!(
            "UPDATE payment_types \
             SET display_name = $1, icon = $2, color = $3, bank_account_id = $4, \
                 is_active = $5, sort_order = $6, updated_at = NOW() \
             WHERE id = $7 \
             RETURNING {PAYMENT_TYPE_COLUMNS}"
        ))
        .bind(
            input
                .display_name
                .as_deref()
                .map(str::trim)
                .unwrap_or(&existing.display_name),
        )
        .bind(input.icon.or(existing.icon))
        .bind(input.color.or(existing.color))
        .bind(input.bank_account_id.or(existing.bank_account_id))
        .bind(input.is_active.unwrap_or(existing.is_active))
        .bind(input.sort_order.unwrap_or(existing.sort_order))
        .bind(payment_type_id)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(%payment_type_id, "payment type updated");

        Ok(payment_type)
    }

    /// Soft delete
    pub async fn deactivate_payment_type(&self, payment_type_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE payment_types SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(payment_type_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Payment type".to_string()));
        }

        tracing::info!(%payment_type_id, "payment type deactivated");

        Ok(())
    }
}
