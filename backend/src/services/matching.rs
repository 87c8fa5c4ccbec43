//! Manual matching of bank statement lines to POS sales

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{validate_confidence_score, validate_match_amount, MatchType};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult, ValidationCollector};
use crate::services::activity;
use crate::services::reconciliation::{lock_open_record, recompute_balances, ENTITY_RECONCILIATION};

/// Matching service linking bank lines to sales
#[derive(Clone)]
pub struct MatchingService {
    db: PgPool,
}

/// Link between one bank line and one sale
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TransactionMatch {
    pub id: Uuid,
    pub reconciliation_id: Uuid,
    pub bank_transaction_id: Uuid,
    pub sale_id: Uuid,
    pub match_amount: Decimal,
    #[sqlx(try_from = "String")]
    pub match_type: MatchType,
    pub confidence_score: Option<Decimal>,
    pub notes: Option<String>,
    pub matched_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// POS sale not yet matched to any bank line
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UnmatchedSale {
    pub id: Uuid,
    pub receipt_number: String,
    pub sale_date: NaiveDate,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub status: String,
}

/// Input for matching a bank line to a sale
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMatchInput {
    pub bank_transaction_id: Uuid,
    pub sale_id: Uuid,
    pub match_amount: Decimal,
    #[serde(default)]
    pub match_type: MatchType,
    pub confidence_score: Option<Decimal>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

/// Field checks that need no database access
pub fn check_match_fields(input: &CreateMatchInput, collector: &mut ValidationCollector) {
    collector.absorb(input.validate());
    collector.check("match_amount", validate_match_amount(input.match_amount));
    if let Some(score) = input.confidence_score {
        collector.check("confidence_score", validate_confidence_score(score));
    }
}

#[derive(Debug, FromRow)]
struct LockedLineRow {
    reconciliation_id: Uuid,
    is_reconciled: bool,
}

/// Matches of a reconciliation in the order they were made
pub async fn list_matches(db: &PgPool, reconciliation_id: Uuid) -> AppResult<Vec<TransactionMatch>> {
    let matches = sqlx::query_as::<_, TransactionMatch>(
        r#"
        SELECT id, reconciliation_id, bank_transaction_id, sale_id, match_amount,
               match_type, confidence_score, notes, matched_by, created_at
        FROM transaction_matches
        WHERE reconciliation_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(reconciliation_id)
    .fetch_all(db)
    .await?;

    Ok(matches)
}

impl MatchingService {
    /// Create a new MatchingService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_matches(&self, reconciliation_id: Uuid) -> AppResult<Vec<TransactionMatch>> {
        list_matches(&self.db, reconciliation_id).await
    }

    /// Link a bank line to a sale and refresh the reconciliation's balances
    pub async fn create_match(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        input: CreateMatchInput,
    ) -> AppResult<TransactionMatch> {
        let mut collector = ValidationCollector::new();
        check_match_fields(&input, &mut collector);
        collector.finish()?;

        let mut tx = self.db.begin().await?;

        lock_open_record(&mut tx, reconciliation_id).await?;

        let line = sqlx::query_as::<_, LockedLineRow>(
            "SELECT reconciliation_id, is_reconciled FROM bank_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(input.bank_transaction_id)
        .fetch_optional(&mut *tx)
        .await?
        .filter(|line| line.reconciliation_id == reconciliation_id)
        .ok_or_else(|| {
            AppError::validation(
                "bank_transaction_id",
                "Bank transaction does not belong to this reconciliation",
            )
        })?;

        if line.is_reconciled {
            return Err(AppError::Conflict {
                resource: "bank_transaction_id".to_string(),
                message: "Bank transaction is already matched".to_string(),
            });
        }

        let sale_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM sales WHERE id = $1)",
        )
        .bind(input.sale_id)
        .fetch_one(&mut *tx)
        .await?;
        if !sale_exists {
            return Err(AppError::validation("sale_id", "Sale does not exist"));
        }

        let sale_matched = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM transaction_matches WHERE sale_id = $1)",
        )
        .bind(input.sale_id)
        .fetch_one(&mut *tx)
        .await?;
        if sale_matched {
            return Err(AppError::Conflict {
                resource: "sale_id".to_string(),
                message: "Sale is already matched to a bank transaction".to_string(),
            });
        }

        let created = sqlx::query_as::<_, TransactionMatch>(
            r#"
            INSERT INTO transaction_matches (
                reconciliation_id, bank_transaction_id, sale_id, match_amount,
                match_type, confidence_score, notes, matched_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, reconciliation_id, bank_transaction_id, sale_id, match_amount,
                      match_type, confidence_score, notes, matched_by, created_at
            "#,
        )
        .bind(reconciliation_id)
        .bind(input.bank_transaction_id)
        .bind(input.sale_id)
        .bind(input.match_amount)
        .bind(input.match_type.as_str())
        .bind(input.confidence_score)
        .bind(&input.notes)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE bank_transactions SET is_reconciled = TRUE WHERE id = $1")
            .bind(input.bank_transaction_id)
            .execute(&mut *tx)
            .await?;

        let (expected, difference) = recompute_balances(&mut tx, reconciliation_id).await?;

        activity::record(
            &mut tx,
            user_id,
            "create_transaction_match",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({
                "match_id": created.id,
                "bank_transaction_id": input.bank_transaction_id,
                "sale_id": input.sale_id,
                "match_amount": input.match_amount,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            %reconciliation_id,
            match_id = %created.id,
            %expected,
            %difference,
            "bank transaction matched"
        );

        Ok(created)
    }

    /// Remove a match, returning its bank line to the unmatched list
    pub async fn delete_match(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        match_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        lock_open_record(&mut tx, reconciliation_id).await?;

        let (bank_transaction_id, sale_id) = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            DELETE FROM transaction_matches
            WHERE id = $1 AND reconciliation_id = $2
            RETURNING bank_transaction_id, sale_id
            "#,
        )
        .bind(match_id)
        .bind(reconciliation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction match".to_string()))?;

        sqlx::query("UPDATE bank_transactions SET is_reconciled = FALSE WHERE id = $1")
            .bind(bank_transaction_id)
            .execute(&mut *tx)
            .await?;

        recompute_balances(&mut tx, reconciliation_id).await?;

        activity::record(
            &mut tx,
            user_id,
            "delete_transaction_match",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({
                "match_id": match_id,
                "bank_transaction_id": bank_transaction_id,
                "sale_id": sale_id,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%reconciliation_id, %match_id, "transaction match removed");

        Ok(())
    }

    /// Sales inside the reconciliation period that no bank line accounts for
    pub async fn list_unmatched_sales(&self, reconciliation_id: Uuid) -> AppResult<Vec<UnmatchedSale>> {
        let (period_start, period_end) = sqlx::query_as::<_, (NaiveDate, NaiveDate)>(
            "SELECT period_start, period_end FROM reconciliation_records WHERE id = $1",
        )
        .bind(reconciliation_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Reconciliation".to_string()))?;

        let sales = sqlx::query_as::<_, UnmatchedSale>(
            r#"
            SELECT s.id, s.receipt_number, s.sale_date, s.total_amount, s.payment_method, s.status
            FROM sales s
            WHERE s.sale_date BETWEEN $1 AND $2
              AND NOT EXISTS (
                  SELECT 1 FROM transaction_matches m WHERE m.sale_id = s.id
              )
            ORDER BY s.sale_date ASC, s.receipt_number ASC
            "#,
        )
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.db)
        .await?;

        Ok(sales)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse};
    use shared::AccountType;

    use crate::services::bank_account::{BankAccountService, CreateBankAccountInput};
    use crate::services::reconciliation::{CreateReconciliationInput, ReconciliationService};

    struct Fixture {
        user_id: Uuid,
        reconciliation_id: Uuid,
        sale_id: Uuid,
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    /// Account with 500.00 opening balance, a draft March reconciliation and one sale
    async fn seed(db: &PgPool) -> Fixture {
        let user_id = Uuid::new_v4();
        let account = BankAccountService::new(db.clone())
            .create_account(
                user_id,
                CreateBankAccountInput {
                    account_name: "Store takings".to_string(),
                    bank_name: "First Bank".to_string(),
                    account_number: "0012-3456-78".to_string(),
                    account_type: AccountType::Checking,
                    currency: None,
                    opening_balance: Some(Decimal::new(50000, 2)),
                    notes: None,
                },
            )
            .await
            .unwrap();
        let record = ReconciliationService::new(db.clone())
            .create_reconciliation(
                user_id,
                CreateReconciliationInput {
                    bank_account_id: account.id,
                    reconciliation_date: day(31),
                    period_start: day(1),
                    period_end: day(31),
                    opening_balance: None,
                    closing_balance: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        let sale_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO sales (receipt_number, sale_date, total_amount) VALUES ('R-0001', $1, 45.50) RETURNING id",
        )
        .bind(day(14))
        .fetch_one(db)
        .await
        .unwrap();

        Fixture {
            user_id,
            reconciliation_id: record.id,
            sale_id,
        }
    }

    async fn add_bank_line(db: &PgPool, reconciliation_id: Uuid, amount: Decimal) -> Uuid {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO bank_transactions (
                reconciliation_id, bank_account_id, transaction_date, description,
                amount, transaction_type
            )
            SELECT id, bank_account_id, period_start, 'Card settlement', $2, 'credit'
            FROM reconciliation_records WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(reconciliation_id)
        .bind(amount)
        .fetch_one(db)
        .await
        .unwrap()
    }

    fn match_input(bank_transaction_id: Uuid, sale_id: Uuid) -> CreateMatchInput {
        CreateMatchInput {
            bank_transaction_id,
            sale_id,
            match_amount: Decimal::new(4550, 2),
            match_type: MatchType::Manual,
            confidence_score: None,
            notes: None,
        }
    }

    #[sqlx::test]
    async fn test_sale_cannot_be_matched_twice(db: PgPool) {
        let fixture = seed(&db).await;
        let first_line = add_bank_line(&db, fixture.reconciliation_id, Decimal::new(4550, 2)).await;
        let second_line = add_bank_line(&db, fixture.reconciliation_id, Decimal::new(4550, 2)).await;
        let service = MatchingService::new(db.clone());

        service
            .create_match(
                fixture.user_id,
                fixture.reconciliation_id,
                match_input(first_line, fixture.sale_id),
            )
            .await
            .unwrap();
        let err = service
            .create_match(
                fixture.user_id,
                fixture.reconciliation_id,
                match_input(second_line, fixture.sale_id),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict { ref resource, .. } if resource == "sale_id"));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
        assert_eq!(service.list_matches(fixture.reconciliation_id).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    async fn test_matched_line_leaves_unmatched_list(db: PgPool) {
        let fixture = seed(&db).await;
        let line = add_bank_line(&db, fixture.reconciliation_id, Decimal::new(4550, 2)).await;
        let service = MatchingService::new(db.clone());
        let reconciliations = ReconciliationService::new(db.clone());

        let unmatched = reconciliations
            .list_bank_transactions(fixture.reconciliation_id, true)
            .await
            .unwrap();
        assert_eq!(unmatched.iter().map(|t| t.id).collect::<Vec<_>>(), vec![line]);

        let created = service
            .create_match(
                fixture.user_id,
                fixture.reconciliation_id,
                match_input(line, fixture.sale_id),
            )
            .await
            .unwrap();

        let unmatched = reconciliations
            .list_bank_transactions(fixture.reconciliation_id, true)
            .await
            .unwrap();
        assert!(unmatched.is_empty());
        let all = reconciliations
            .list_bank_transactions(fixture.reconciliation_id, false)
            .await
            .unwrap();
        assert!(all[0].is_reconciled);
        assert!(service
            .list_unmatched_sales(fixture.reconciliation_id)
            .await
            .unwrap()
            .is_empty());
        let record = reconciliations
            .get_reconciliation(fixture.reconciliation_id)
            .await
            .unwrap();
        assert_eq!(record.expected_balance, Decimal::new(54550, 2));

        service
            .delete_match(fixture.user_id, fixture.reconciliation_id, created.id)
            .await
            .unwrap();

        let unmatched = reconciliations
            .list_bank_transactions(fixture.reconciliation_id, true)
            .await
            .unwrap();
        assert_eq!(unmatched.len(), 1);
        let record = reconciliations
            .get_reconciliation(fixture.reconciliation_id)
            .await
            .unwrap();
        assert_eq!(record.expected_balance, Decimal::new(50000, 2));
    }

    #[sqlx::test]
    async fn test_line_from_other_reconciliation_rejected(db: PgPool) {
        let fixture = seed(&db).await;
        let service = MatchingService::new(db.clone());

        let err = service
            .create_match(
                fixture.user_id,
                fixture.reconciliation_id,
                match_input(Uuid::new_v4(), fixture.sale_id),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "bank_transaction_id"));
    }

    fn input(amount: Decimal, score: Option<Decimal>) -> CreateMatchInput {
        CreateMatchInput {
            bank_transaction_id: Uuid::new_v4(),
            sale_id: Uuid::new_v4(),
            match_amount: amount,
            match_type: MatchType::default(),
            confidence_score: score,
            notes: None,
        }
    }

    #[test]
    fn test_valid_match_passes() {
        let mut collector = ValidationCollector::new();
        check_match_fields(&input(Decimal::new(4550, 2), Some(Decimal::from(90))), &mut collector);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_zero_amount_and_bad_score_rejected() {
        let mut collector = ValidationCollector::new();
        check_match_fields(&input(Decimal::ZERO, Some(Decimal::from(150))), &mut collector);
        match collector.finish() {
            Err(AppError::ValidationErrors(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["match_amount", "confidence_score"]);
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_match_type_defaults_to_manual() {
        let parsed: CreateMatchInput = serde_json::from_value(serde_json::json!({
            "bank_transaction_id": Uuid::nil(),
            "sale_id": Uuid::nil(),
            "match_amount": "12.50"
        }))
        .unwrap();
        assert_eq!(parsed.match_type, MatchType::Manual);
    }
}
