//! Reconciliation discrepancies

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{DiscrepancyStatus, DiscrepancyType};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult, ValidationCollector};
use crate::services::activity;
use crate::services::reconciliation::{lock_open_record, ENTITY_RECONCILIATION};

const DISCREPANCY_COLUMNS: &str = r#"
    id, reconciliation_id, discrepancy_type, amount, description, status,
    resolution_notes, created_by, resolved_by, resolved_at, created_at
"#;

#[derive(Clone)]
pub struct DiscrepancyService {
    db: PgPool,
}

/// Unexplained difference noted during a reconciliation
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Discrepancy {
    pub id: Uuid,
    pub reconciliation_id: Uuid,
    #[sqlx(try_from = "String")]
    pub discrepancy_type: DiscrepancyType,
    pub amount: Decimal,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub status: DiscrepancyStatus,
    pub resolution_notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDiscrepancyInput {
    pub discrepancy_type: DiscrepancyType,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 2000, message = "A description is required"))]
    pub description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveDiscrepancyInput {
    #[validate(length(min = 1, max = 2000, message = "Resolution notes are required"))]
    pub resolution_notes: String,
}

impl DiscrepancyService {
    /// Create a new DiscrepancyService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_discrepancies(&self, reconciliation_id: Uuid) -> AppResult<Vec<Discrepancy>> {
        let discrepancies = sqlx::query_as::<_, Discrepancy>(&format!(
            "SELECT {DISCREPANCY_COLUMNS} FROM reconciliation_discrepancies \
             WHERE reconciliation_id = $1 \
             ORDER BY created_at ASC"
        ))
        .bind(reconciliation_id)
        .fetch_all(&self.db)
        .await?;

        Ok(discrepancies)
    }

    /// Record a discrepancy against an open reconciliation
    pub async fn create_discrepancy(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        input: CreateDiscrepancyInput,
    ) -> AppResult<Discrepancy> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());
        if input.description.trim().is_empty() {
            collector.push("description", "A description is required");
        }
        collector.finish()?;

        let mut tx = self.db.begin().await?;

        lock_open_record(&mut tx, reconciliation_id).await?;

        let discrepancy = sqlx::query_as::<_, Discrepancy>(&format!(
            "INSERT INTO reconciliation_discrepancies \
                (reconciliation_id, discrepancy_type, amount, description, status, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {DISCREPANCY_COLUMNS}"
        ))
        .bind(reconciliation_id)
        .bind(input.discrepancy_type.as_str())
        .bind(input.amount)
        .bind(input.description.trim())
        .bind(DiscrepancyStatus::Open.as_str())
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "create_discrepancy",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({
                "discrepancy_id": discrepancy.id,
                "discrepancy_type": discrepancy.discrepancy_type,
                "amount": discrepancy.amount,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%reconciliation_id, discrepancy_id = %discrepancy.id, "discrepancy recorded");

        Ok(discrepancy)
    }

    /// Mark an open discrepancy resolved
    pub async fn resolve_discrepancy(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        discrepancy_id: Uuid,
        input: ResolveDiscrepancyInput,
    ) -> AppResult<Discrepancy> {
        input.validate()?;

        let mut tx = self.db.begin().await?;

        let status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status FROM reconciliation_discrepancies
            WHERE id = $1 AND reconciliation_id = $2
            FOR UPDATE
            "#,
        )
        .bind(discrepancy_id)
        .bind(reconciliation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Discrepancy".to_string()))?;

        if status != DiscrepancyStatus::Open.as_str() {
            return Err(AppError::InvalidStateTransition(
                "Only open discrepancies can be resolved".to_string(),
            ));
        }

        let discrepancy = sqlx::query_as::<_, Discrepancy>(&format!(
            "UPDATE reconciliation_discrepancies \
             SET status = $1, resolution_notes = $2, resolved_by = $3, resolved_at = NOW() \
             WHERE id = $4 \
             RETURNING {DISCREPANCY_COLUMNS}"
        ))
        .bind(DiscrepancyStatus::Resolved.as_str())
        .bind(input.resolution_notes.trim())
        .bind(user_id)
        .bind(discrepancy_id)
        .fetch_one(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "resolve_discrepancy",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({ "discrepancy_id": discrepancy_id }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%reconciliation_id, %discrepancy_id, "discrepancy resolved");

        Ok(discrepancy)
    }
}
