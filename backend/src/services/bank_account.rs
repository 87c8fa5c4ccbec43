//! Bank account service

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{validate_account_number, AccountType};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult, ValidationCollector};
use crate::services::activity;

const ENTITY_BANK_ACCOUNT: &str = "bank_account";

/// Bank account service for the accounts statements are reconciled against
#[derive(Clone)]
pub struct BankAccountService {
    db: PgPool,
}

/// Bank account
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BankAccount {
    pub id: Uuid,
    pub account_name: String,
    pub bank_name: String,
    pub account_number: String,
    #[sqlx(try_from = "String")]
    pub account_type: AccountType,
    pub currency: String,
    pub opening_balance: Decimal,
    pub current_balance: Decimal,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a bank account
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBankAccountInput {
    #[validate(length(min = 1, max = 200, message = "Account name is required"))]
    pub account_name: String,
    #[validate(length(min = 1, max = 200, message = "Bank name is required"))]
    pub bank_name: String,
    pub account_number: String,
    pub account_type: AccountType,
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: Option<String>,
    pub opening_balance: Option<Decimal>,
    pub notes: Option<String>,
}

/// Input for updating a bank account
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateBankAccountInput {
    #[validate(length(min = 1, max = 200, message = "Account name is required"))]
    pub account_name: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Bank name is required"))]
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_type: Option<AccountType>,
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: Option<String>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

const ACCOUNT_COLUMNS: &str = r#"
    id, account_name, bank_name, account_number, account_type, currency,
    opening_balance, current_balance, is_active, notes, created_at, updated_at
"#;

impl BankAccountService {
    /// Create a new BankAccountService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// List accounts, optionally only the active ones
    pub async fn list_accounts(&self, active_only: bool) -> AppResult<Vec<BankAccount>> {
        let accounts = sqlx::query_as::<_, BankAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM bank_accounts \
             WHERE ($1 = FALSE OR is_active = TRUE) \
             ORDER BY account_name ASC"
        ))
        .bind(active_only)
        .fetch_all(&self.db)
        .await?;

        Ok(accounts)
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: Uuid) -> AppResult<BankAccount> {
        sqlx::query_as::<_, BankAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM bank_accounts WHERE id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Bank account".to_string()))
    }

    /// Create an account; its current balance starts at the opening balance
    pub async fn create_account(
        &self,
        user_id: Uuid,
        input: CreateBankAccountInput,
    ) -> AppResult<BankAccount> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());
        collector.check(
            "account_number",
            validate_account_number(&input.account_number),
        );
        collector.finish()?;

        let opening_balance = input.opening_balance.unwrap_or(Decimal::ZERO);
        let currency = input
            .currency
            .as_deref()
            .unwrap_or("USD")
            .to_ascii_uppercase();

        let mut tx = self.db.begin().await?;

        let account = sqlx::query_as::<_, BankAccount>(&format!(
            "INSERT INTO bank_accounts (account_name, bank_name, account_number, account_type, \
                currency, opening_balance, current_balance, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $6, $7) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(input.account_name.trim())
        .bind(input.bank_name.trim())
        .bind(input.account_number.trim())
        .bind(input.account_type.as_str())
        .bind(&currency)
        .bind(opening_balance)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "create_bank_account",
            ENTITY_BANK_ACCOUNT,
            Some(account.id),
            json!({ "account_name": account.account_name, "account_type": account.account_type }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(account_id = %account.id, "bank account created");

        Ok(account)
    }

    /// Partially update an account
    pub async fn update_account(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        input: UpdateBankAccountInput,
    ) -> AppResult<BankAccount> {
        let mut collector = ValidationCollector::new();
        collector.absorb(input.validate());
        if let Some(number) = &input.account_number {
            collector.check("account_number", validate_account_number(number));
        }
        collector.finish()?;

        let existing = self.get_account(account_id).await?;

        if input.is_active == Some(false) && existing.is_active {
            self.ensure_no_open_reconciliation(account_id).await?;
        }

        let mut tx = self.db.begin().await?;

        let account = sqlx::query_as::<_, BankAccount>(&format!(
            "UPDATE bank_accounts \
             SET account_name = $1, bank_name = $2, account_number = $3, account_type = $4, \
                 currency = $5, is_active = $6, notes = $7, updated_at = NOW() \
             WHERE id = $8 \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(
            input
                .account_name
                .as_deref()
                .map(str::trim)
                .unwrap_or(&existing.account_name),
        )
        .bind(
            input
                .bank_name
                .as_deref()
                .map(str::trim)
                .unwrap_or(&existing.bank_name),
        )
        .bind(
            input
                .account_number
                .as_deref()
                .map(str::trim)
                .unwrap_or(&existing.account_number),
        )
        .bind(input.account_type.unwrap_or(existing.account_type).as_str())
        .bind(
            input
                .currency
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or(existing.currency),
        )
        .bind(input.is_active.unwrap_or(existing.is_active))
        .bind(input.notes.or(existing.notes))
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "update_bank_account",
            ENTITY_BANK_ACCOUNT,
            Some(account_id),
            json!({ "is_active": account.is_active }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%account_id, "bank account updated");

        Ok(account)
    }

    /// Soft delete: the account stays for history but is hidden from active lists
    pub async fn deactivate_account(&self, user_id: Uuid, account_id: Uuid) -> AppResult<()> {
        self.get_account(account_id).await?;
        self.ensure_no_open_reconciliation(account_id).await?;

        let mut tx = self.db.begin().await?;

        sqlx::query(
            "UPDATE bank_accounts SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

        activity::record(
            &mut tx,
            user_id,
            "deactivate_bank_account",
            ENTITY_BANK_ACCOUNT,
            Some(account_id),
            json!({}),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%account_id, "bank account deactivated");

        Ok(())
    }

    async fn ensure_no_open_reconciliation(&self, account_id: Uuid) -> AppResult<()> {
        let open = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM reconciliation_records
            WHERE bank_account_id = $1 AND status IN ('draft', 'in_progress')
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.db)
        .await?;

        if open > 0 {
            return Err(AppError::Conflict {
                resource: "bank_account".to_string(),
                message: format!(
                    "Account has {} reconciliation(s) still open; complete or cancel them first",
                    open
                ),
            });
        }
        Ok(())
    }
}
