//! Reconciliation service: records, status workflow and balance figures

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{
    balance_difference, expected_balance, validate_period, BankTransactionType, DiscrepancyStatus,
    PaginatedResponse, Pagination, ReconciliationStatus,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult, ValidationCollector};
use crate::services::activity;
use crate::services::discrepancy::Discrepancy;
use crate::services::matching::{self, TransactionMatch};

pub(crate) const ENTITY_RECONCILIATION: &str = "reconciliation_record";

const RECORD_COLUMNS: &str = r#"
    r.id, r.bank_account_id, a.account_name, r.reconciliation_date, r.period_start,
    r.period_end, r.opening_balance, r.closing_balance, r.expected_balance,
    r.difference_amount, r.status, r.statement_file, r.notes, r.created_by,
    r.reconciled_by, r.completed_at, r.created_at, r.updated_at
"#;

/// Reconciliation service for statement-versus-POS reconciliations
#[derive(Clone)]
pub struct ReconciliationService {
    db: PgPool,
}

/// Reconciliation record
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub bank_account_id: Uuid,
    pub account_name: String,
    pub reconciliation_date: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub opening_balance: Decimal,
    pub closing_balance: Option<Decimal>,
    pub expected_balance: Decimal,
    pub difference_amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: ReconciliationStatus,
    pub statement_file: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub reconciled_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Imported bank statement line
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BankTransaction {
    pub id: Uuid,
    pub reconciliation_id: Uuid,
    pub bank_account_id: Uuid,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub transaction_type: BankTransactionType,
    pub balance_after: Option<Decimal>,
    pub is_reconciled: bool,
    pub created_at: DateTime<Utc>,
}

/// Counts and totals shown alongside a reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationSummary {
    pub transaction_count: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub matched_amount: Decimal,
    pub open_discrepancies: usize,
    pub open_discrepancy_amount: Decimal,
}

/// Reconciliation with its statement lines, matches and discrepancies
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationDetail {
    #[serde(flatten)]
    pub record: ReconciliationRecord,
    pub bank_transactions: Vec<BankTransaction>,
    pub matches: Vec<TransactionMatch>,
    pub discrepancies: Vec<Discrepancy>,
    pub summary: ReconciliationSummary,
}

/// Input for starting a reconciliation
#[derive(Debug, Deserialize, Validate)]
pub struct CreateReconciliationInput {
    pub bank_account_id: Uuid,
    pub reconciliation_date: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Defaults to the account's current balance
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusInput {
    pub status: ReconciliationStatus,
}

/// Input for completing a reconciliation
#[derive(Debug, Default, Deserialize)]
pub struct CompleteReconciliationInput {
    /// Overrides the stored statement balance
    pub closing_balance: Option<Decimal>,
    pub notes: Option<String>,
}

/// Filters for listing reconciliations
#[derive(Debug, Default, Deserialize)]
pub struct ReconciliationFilter {
    pub bank_account_id: Option<Uuid>,
    pub status: Option<ReconciliationStatus>,
}

#[derive(Debug, FromRow)]
struct LockedRecordRow {
    #[sqlx(try_from = "String")]
    status: ReconciliationStatus,
    bank_account_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
    closing_balance: Option<Decimal>,
}

/// The parts of a locked reconciliation row that mutations check against
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockedRecord {
    pub status: ReconciliationStatus,
    pub bank_account_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub closing_balance: Option<Decimal>,
}

/// Lock a reconciliation for the rest of the caller's transaction
pub(crate) async fn lock_record(
    conn: &mut PgConnection,
    reconciliation_id: Uuid,
) -> AppResult<LockedRecord> {
    let row = sqlx::query_as::<_, LockedRecordRow>(
        r#"
        SELECT status, bank_account_id, period_start, period_end, closing_balance
        FROM reconciliation_records
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(reconciliation_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Reconciliation".to_string()))?;

    Ok(LockedRecord {
        status: row.status,
        bank_account_id: row.bank_account_id,
        period_start: row.period_start,
        period_end: row.period_end,
        closing_balance: row.closing_balance,
    })
}

/// Lock a reconciliation that must still accept statement lines, matches and discrepancies
pub(crate) async fn lock_open_record(
    conn: &mut PgConnection,
    reconciliation_id: Uuid,
) -> AppResult<LockedRecord> {
    let record = lock_record(conn, reconciliation_id).await?;
    if !record.status.accepts_changes() {
        return Err(AppError::InvalidStateTransition(format!(
            "Reconciliation is {} and can no longer be changed",
            record.status
        )));
    }
    Ok(record)
}

/// Recompute expected balance and difference from the current matches
pub(crate) async fn recompute_balances(
    conn: &mut PgConnection,
    reconciliation_id: Uuid,
) -> AppResult<(Decimal, Decimal)> {
    let (opening, closing) = sqlx::query_as::<_, (Decimal, Option<Decimal>)>(
        "SELECT opening_balance, closing_balance FROM reconciliation_records WHERE id = $1",
    )
    .bind(reconciliation_id)
    .fetch_one(&mut *conn)
    .await?;

    let amounts = sqlx::query_scalar::<_, Decimal>(
        "SELECT match_amount FROM transaction_matches WHERE reconciliation_id = $1",
    )
    .bind(reconciliation_id)
    .fetch_all(&mut *conn)
    .await?;

    let expected = expected_balance(opening, amounts);
    let difference = balance_difference(closing, expected);

    sqlx::query(
        r#"
        UPDATE reconciliation_records
        SET expected_balance = $1, difference_amount = $2, updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(expected)
    .bind(difference)
    .bind(reconciliation_id)
    .execute(&mut *conn)
    .await?;

    Ok((expected, difference))
}

/// Fold statement lines, matches and discrepancies into the summary figures
pub fn summarize(
    transactions: &[BankTransaction],
    matches: &[TransactionMatch],
    discrepancies: &[Discrepancy],
) -> ReconciliationSummary {
    let matched_count = transactions.iter().filter(|t| t.is_reconciled).count();
    let sum_of = |kind: BankTransactionType| -> Decimal {
        transactions
            .iter()
            .filter(|t| t.transaction_type == kind)
            .map(|t| t.amount.abs())
            .sum()
    };
    let open: Vec<&Discrepancy> = discrepancies
        .iter()
        .filter(|d| d.status == DiscrepancyStatus::Open)
        .collect();

    ReconciliationSummary {
        transaction_count: transactions.len(),
        matched_count,
        unmatched_count: transactions.len() - matched_count,
        total_credits: sum_of(BankTransactionType::Credit),
        total_debits: sum_of(BankTransactionType::Debit),
        matched_amount: matches.iter().map(|m| m.match_amount).sum(),
        open_discrepancies: open.len(),
        open_discrepancy_amount: open.iter().map(|d| d.amount).sum(),
    }
}

impl ReconciliationService {
    /// Create a new ReconciliationService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Start a draft reconciliation for an account
    pub async fn create_reconciliation(
        &self,
        user_id: Uuid,
        input: CreateReconciliationInput,
    ) -> AppResult<ReconciliationRecord> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());
        collector.check(
            "period_end",
            validate_period(input.period_start, input.period_end),
        );

        let account = sqlx::query_as::<_, (Decimal, bool)>(
            "SELECT current_balance, is_active FROM bank_accounts WHERE id = $1",
        )
        .bind(input.bank_account_id)
        .fetch_optional(&self.db)
        .await?;

        let current_balance = match account {
            None => {
                collector.push("bank_account_id", "Bank account does not exist");
                Decimal::ZERO
            }
            Some((_, false)) => {
                collector.push("bank_account_id", "Bank account is inactive");
                Decimal::ZERO
            }
            Some((balance, true)) => balance,
        };
        collector.finish()?;

        let opening = input.opening_balance.unwrap_or(current_balance);
        let difference = balance_difference(input.closing_balance, opening);

        let mut tx = self.db.begin().await?;

        let reconciliation_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO reconciliation_records (
                bank_account_id, reconciliation_date, period_start, period_end,
                opening_balance, closing_balance, expected_balance, difference_amount,
                status, notes, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $5, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(input.bank_account_id)
        .bind(input.reconciliation_date)
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(opening)
        .bind(input.closing_balance)
        .bind(difference)
        .bind(ReconciliationStatus::Draft.as_str())
        .bind(&input.notes)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "create_reconciliation",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({
                "bank_account_id": input.bank_account_id,
                "period_start": input.period_start,
                "period_end": input.period_end,
                "opening_balance": opening,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%reconciliation_id, bank_account_id = %input.bank_account_id, "reconciliation created");

        self.get_reconciliation(reconciliation_id).await
    }

    /// List reconciliations, newest first
    pub async fn list_reconciliations(
        &self,
        filter: &ReconciliationFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<ReconciliationRecord>> {
        const FILTER: &str = r#"
            WHERE ($1::uuid IS NULL OR r.bank_account_id = $1)
              AND ($2::text IS NULL OR r.status = $2)
        "#;

        let status = filter.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM reconciliation_records r {FILTER}"
        ))
        .bind(filter.bank_account_id)
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let records = sqlx::query_as::<_, ReconciliationRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM reconciliation_records r \
             JOIN bank_accounts a ON a.id = r.bank_account_id \
             {FILTER} \
             ORDER BY r.reconciliation_date DESC, r.created_at DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(filter.bank_account_id)
        .bind(status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(records, pagination, total.max(0) as u64))
    }

    /// Get a reconciliation record
    pub async fn get_reconciliation(&self, reconciliation_id: Uuid) -> AppResult<ReconciliationRecord> {
        sqlx::query_as::<_, ReconciliationRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM reconciliation_records r \
             JOIN bank_accounts a ON a.id = r.bank_account_id \
             WHERE r.id = $1"
        ))
        .bind(reconciliation_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Reconciliation".to_string()))
    }

    /// Get a reconciliation with everything attached to it
    pub async fn get_reconciliation_detail(
        &self,
        reconciliation_id: Uuid,
    ) -> AppResult<ReconciliationDetail> {
        let record = self.get_reconciliation(reconciliation_id).await?;
        let bank_transactions = self.list_bank_transactions(reconciliation_id, false).await?;
        let matches = matching::list_matches(&self.db, reconciliation_id).await?;
        let discrepancies = sqlx::query_as::<_, Discrepancy>(
            r#"
            SELECT id, reconciliation_id, discrepancy_type, amount, description, status,
                   resolution_notes, created_by, resolved_by, resolved_at, created_at
            FROM reconciliation_discrepancies
            WHERE reconciliation_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(reconciliation_id)
        .fetch_all(&self.db)
        .await?;

        let summary = summarize(&bank_transactions, &matches, &discrepancies);

        Ok(ReconciliationDetail {
            record,
            bank_transactions,
            matches,
            discrepancies,
            summary,
        })
    }

    /// Statement lines of a reconciliation, optionally only the unmatched ones
    pub async fn list_bank_transactions(
        &self,
        reconciliation_id: Uuid,
        unmatched_only: bool,
    ) -> AppResult<Vec<BankTransaction>> {
        let transactions = sqlx::query_as::<_, BankTransaction>(
            r#"
            SELECT id, reconciliation_id, bank_account_id, transaction_date, description,
                   amount, transaction_type, balance_after, is_reconciled, created_at
            FROM bank_transactions
            WHERE reconciliation_id = $1
              AND ($2 = FALSE OR is_reconciled = FALSE)
            ORDER BY transaction_date ASC, created_at ASC
            "#,
        )
        .bind(reconciliation_id)
        .bind(unmatched_only)
        .fetch_all(&self.db)
        .await?;

        Ok(transactions)
    }

    /// Move a reconciliation along its workflow
    pub async fn update_status(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        input: UpdateStatusInput,
    ) -> AppResult<ReconciliationRecord> {
        if input.status == ReconciliationStatus::Completed {
            return self
                .complete(user_id, reconciliation_id, CompleteReconciliationInput::default())
                .await;
        }

        let mut tx = self.db.begin().await?;

        let record = lock_record(&mut tx, reconciliation_id).await?;
        if !record.status.can_transition_to(input.status) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot move a reconciliation from {} to {}",
                record.status, input.status
            )));
        }

        sqlx::query(
            "UPDATE reconciliation_records SET status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(input.status.as_str())
        .bind(reconciliation_id)
        .execute(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "update_reconciliation_status",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({ "from": record.status, "to": input.status }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            %reconciliation_id,
            from = record.status.as_str(),
            to = input.status.as_str(),
            "reconciliation status changed"
        );

        self.get_reconciliation(reconciliation_id).await
    }

    /// Close a reconciliation and carry its statement balance to the account
    pub async fn complete(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        input: CompleteReconciliationInput,
    ) -> AppResult<ReconciliationRecord> {
        let mut tx = self.db.begin().await?;

        let record = lock_record(&mut tx, reconciliation_id).await?;
        if !record.status.can_transition_to(ReconciliationStatus::Completed) {
            return Err(AppError::InvalidStateTransition(format!(
                "Only in-progress reconciliations can be completed (currently {})",
                record.status
            )));
        }

        let closing = input
            .closing_balance
            .or(record.closing_balance)
            .ok_or_else(|| {
                AppError::validation(
                    "closing_balance",
                    "A closing balance is required to complete a reconciliation",
                )
            })?;

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET closing_balance = $1, notes = COALESCE($2, notes)
            WHERE id = $3
            "#,
        )
        .bind(closing)
        .bind(&input.notes)
        .bind(reconciliation_id)
        .execute(&mut *tx)
        .await?;

        let (expected, difference) = recompute_balances(&mut tx, reconciliation_id).await?;

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET status = $1, reconciled_by = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(ReconciliationStatus::Completed.as_str())
        .bind(user_id)
        .bind(reconciliation_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE bank_accounts SET current_balance = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(closing)
        .bind(record.bank_account_id)
        .execute(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "complete_reconciliation",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({
                "closing_balance": closing,
                "expected_balance": expected,
                "difference_amount": difference,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%reconciliation_id, %expected, %difference, "reconciliation completed");

        self.get_reconciliation(reconciliation_id).await
    }
}
