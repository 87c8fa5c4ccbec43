//! Bank statement import
//!
//! Statements arrive as CSV with `Date`, `Description`, `Amount` and
//! `Balance` columns in any order. Rows that cannot be read are reported back
//! rather than failing the whole upload.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use shared::{BankTransactionType, ReconciliationStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::{AppError, AppResult};
use crate::services::activity;
use crate::services::reconciliation::{lock_open_record, recompute_balances, ENTITY_RECONCILIATION};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];
const CURRENCY_SYMBOLS: [char; 6] = ['$', '€', '£', '¥', '฿', '₹'];
const CURRENCY_CODES: [&str; 6] = ["USD", "EUR", "GBP", "THB", "JPY", "INR"];

#[derive(Clone)]
pub struct StatementService {
    db: PgPool,
    config: UploadConfig,
}

/// One readable statement row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLine {
    pub line: usize,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub balance_after: Option<Decimal>,
}

/// A row left out of the import and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedStatement {
    pub lines: Vec<StatementLine>,
    pub skipped: Vec<SkippedRow>,
}

/// Result of an upload
#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: Vec<SkippedRow>,
    pub statement_file: String,
    pub closing_balance: Option<Decimal>,
    pub status: ReconciliationStatus,
}

struct Columns {
    date: usize,
    description: usize,
    amount: usize,
    balance: Option<usize>,
}

/// Accept `.csv` uploads and CSV content types only
pub fn is_csv_upload(file_name: Option<&str>, content_type: Option<&str>) -> bool {
    let by_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"));
    let by_type = content_type.map(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.starts_with("text/csv") || ct.starts_with("application/csv")
    });

    match (by_name, by_type) {
        (Some(name_ok), _) => name_ok,
        (None, Some(type_ok)) => type_ok,
        (None, None) => false,
    }
}

pub fn parse_statement_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Parse an amount that may carry a currency symbol or code, thousands
/// separators, a `CR`/`DR` marker or accounting-style parentheses for
/// negatives. Any other letter makes the amount unreadable.
pub fn parse_statement_amount(value: &str) -> Option<Decimal> {
    let mut body = value.trim().to_uppercase();
    let mut negative = false;

    if let Some(rest) = body.strip_suffix("DR") {
        negative = true;
        body = rest.trim_end().to_string();
    } else if let Some(rest) = body.strip_suffix("CR") {
        body = rest.trim_end().to_string();
    }
    if let Some(inner) = body.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        body = inner.to_string();
    }
    if let Some(rest) = CURRENCY_CODES
        .iter()
        .find_map(|code| body.strip_prefix(code).or_else(|| body.strip_suffix(code)))
    {
        body = rest.to_string();
    }

    let cleaned: String = body
        .chars()
        .filter(|c| !(c.is_whitespace() || *c == ',' || CURRENCY_SYMBOLS.contains(c)))
        .collect();
    let (signed_negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    if !digits.chars().any(|c| c.is_ascii_digit())
        || !digits.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return None;
    }

    let amount = Decimal::from_str(digits).ok()?;
    Some(if negative || signed_negative { -amount } else { amount })
}

/// Physical line a record starts on. The reader reports the position where
/// it began looking for the record, before any blank lines it skipped.
fn record_line(bytes: &[u8], position: &csv::Position) -> usize {
    let start = usize::try_from(position.byte()).unwrap_or(usize::MAX);
    let blank_lines = bytes
        .get(start..)
        .unwrap_or_default()
        .iter()
        .take_while(|b| matches!(**b, b'\n' | b'\r'))
        .filter(|b| **b == b'\n')
        .count();
    usize::try_from(position.line()).unwrap_or(usize::MAX) + blank_lines
}

fn locate_columns(headers: &csv::StringRecord) -> AppResult<Columns> {
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let require = |name: &str| {
        find(name).ok_or_else(|| {
            AppError::validation(
                "file",
                format!("Statement is missing the '{}' column", name),
            )
        })
    };

    Ok(Columns {
        date: require("date")?,
        description: require("description")?,
        amount: require("amount")?,
        balance: find("balance"),
    })
}

/// Read every row of a CSV statement
pub fn parse_statement(bytes: &[u8]) -> AppResult<ParsedStatement> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| AppError::validation("file", format!("Statement is not valid CSV: {}", e)))?
        .clone();
    let columns = locate_columns(&headers)?;

    let mut parsed = ParsedStatement::default();
    for (index, record) in reader.records().enumerate() {
        // Header is line 1
        let fallback_line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let line = e
                    .position()
                    .map_or(fallback_line, |pos| record_line(bytes, pos));
                parsed.skipped.push(SkippedRow {
                    line,
                    reason: format!("unreadable row: {}", e),
                });
                continue;
            }
        };
        let line = record
            .position()
            .map_or(fallback_line, |pos| record_line(bytes, pos));
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        match parse_row(&record, &columns, line) {
            Ok(statement_line) => parsed.lines.push(statement_line),
            Err(reason) => parsed.skipped.push(SkippedRow { line, reason }),
        }
    }

    Ok(parsed)
}

fn parse_row(record: &csv::StringRecord, columns: &Columns, line: usize) -> Result<StatementLine, String> {
    let field = |index: usize| record.get(index).unwrap_or("");

    let raw_date = field(columns.date);
    let transaction_date =
        parse_statement_date(raw_date).ok_or_else(|| format!("invalid date '{}'", raw_date))?;

    let description = field(columns.description).to_string();
    if description.is_empty() {
        return Err("missing description".to_string());
    }

    let raw_amount = field(columns.amount);
    let amount =
        parse_statement_amount(raw_amount).ok_or_else(|| format!("invalid amount '{}'", raw_amount))?;

    let balance_after = match columns.balance.map(field).filter(|v| !v.is_empty()) {
        None => None,
        Some(raw) => Some(
            parse_statement_amount(raw).ok_or_else(|| format!("invalid balance '{}'", raw))?,
        ),
    };

    Ok(StatementLine {
        line,
        transaction_date,
        description,
        amount,
        balance_after,
    })
}

impl StatementService {
    /// Create a new StatementService instance
    pub fn new(db: PgPool, config: UploadConfig) -> Self {
        Self { db, config }
    }

    /// Store an uploaded statement and turn its rows into bank transactions
    pub async fn import_statement(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        file_name: Option<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> AppResult<ImportResult> {
        if !is_csv_upload(file_name.as_deref(), content_type.as_deref()) {
            return Err(AppError::validation(
                "file",
                "Only CSV statements are supported",
            ));
        }
        if bytes.is_empty() {
            return Err(AppError::validation("file", "Statement file is empty"));
        }
        if bytes.len() > self.config.max_bytes {
            return Err(AppError::validation(
                "file",
                format!("Statement exceeds the {} byte limit", self.config.max_bytes),
            ));
        }

        let parsed = parse_statement(&bytes)?;
        if parsed.lines.is_empty() {
            return Err(AppError::validation(
                "file",
                format!(
                    "Statement contains no valid rows ({} skipped)",
                    parsed.skipped.len()
                ),
            ));
        }

        let stored_path = self.store_upload(&bytes).await?;
        let statement_file = stored_path.to_string_lossy().into_owned();

        match self
            .record_import(user_id, reconciliation_id, &parsed, &statement_file, file_name.as_deref())
            .await
        {
            Ok((closing_balance, status)) => {
                tracing::info!(
                    %reconciliation_id,
                    imported = parsed.lines.len(),
                    skipped = parsed.skipped.len(),
                    "statement imported"
                );
                Ok(ImportResult {
                    imported: parsed.lines.len(),
                    skipped: parsed.skipped,
                    statement_file,
                    closing_balance,
                    status,
                })
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&stored_path).await {
                    tracing::warn!(path = %statement_file, "failed to remove orphaned statement: {}", remove_err);
                }
                Err(e)
            }
        }
    }

    async fn store_upload(&self, bytes: &[u8]) -> AppResult<PathBuf> {
        let dir = PathBuf::from(&self.config.statement_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;

        let path = dir.join(format!("{}.csv", Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;

        Ok(path)
    }

    async fn record_import(
        &self,
        user_id: Uuid,
        reconciliation_id: Uuid,
        parsed: &ParsedStatement,
        statement_file: &str,
        original_name: Option<&str>,
    ) -> AppResult<(Option<Decimal>, ReconciliationStatus)> {
        let mut tx = self.db.begin().await?;

        let record = lock_open_record(&mut tx, reconciliation_id).await?;

        for line in &parsed.lines {
            sqlx::query(
                r#"
                INSERT INTO bank_transactions (
                    reconciliation_id, bank_account_id, transaction_date, description,
                    amount, transaction_type, balance_after
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(reconciliation_id)
            .bind(record.bank_account_id)
            .bind(line.transaction_date)
            .bind(&line.description)
            .bind(line.amount)
            .bind(BankTransactionType::from_amount(line.amount).as_str())
            .bind(line.balance_after)
            .execute(&mut *tx)
            .await?;
        }

        let closing_balance = record
            .closing_balance
            .or_else(|| parsed.lines.last().and_then(|l| l.balance_after));
        let status = if record.status == ReconciliationStatus::Draft {
            ReconciliationStatus::InProgress
        } else {
            record.status
        };

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET statement_file = $1, closing_balance = $2, status = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(statement_file)
        .bind(closing_balance)
        .bind(status.as_str())
        .bind(reconciliation_id)
        .execute(&mut *tx)
        .await?;

        recompute_balances(&mut tx, reconciliation_id).await?;

        activity::record(
            &mut tx,
            user_id,
            "import_bank_statement",
            ENTITY_RECONCILIATION,
            Some(reconciliation_id),
            json!({
                "file_name": original_name,
                "statement_file": statement_file,
                "imported": parsed.lines.len(),
                "skipped": parsed.skipped.len(),
            }),
        )
        .await?;

        tx.commit().await?;

        Ok((closing_balance, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(parse_statement_date("2025-03-14"), Some(date(2025, 3, 14)));
        assert_eq!(parse_statement_date("14/03/2025"), Some(date(2025, 3, 14)));
        assert_eq!(parse_statement_date("14-03-2025"), Some(date(2025, 3, 14)));
        assert_eq!(parse_statement_date("03/14/2025"), None);
        assert_eq!(parse_statement_date("yesterday"), None);
    }

    #[test]
    fn test_amount_formats() {
        assert_eq!(parse_statement_amount("1,234.50"), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_statement_amount("$ 99.99"), Some(Decimal::new(9999, 2)));
        assert_eq!(parse_statement_amount("-15.00"), Some(Decimal::new(-1500, 2)));
        assert_eq!(parse_statement_amount("(15.00)"), Some(Decimal::new(-1500, 2)));
        assert_eq!(parse_statement_amount("THB 2,000"), Some(Decimal::from(2000)));
        assert_eq!(parse_statement_amount("100.00 DR"), Some(Decimal::new(-10000, 2)));
        assert_eq!(parse_statement_amount("100.00 CR"), Some(Decimal::new(10000, 2)));
        assert_eq!(parse_statement_amount("n/a"), None);
        assert_eq!(parse_statement_amount(""), None);
        assert_eq!(parse_statement_amount("-"), None);
    }

    #[test]
    fn test_amount_with_stray_letters_rejected() {
        assert_eq!(parse_statement_amount("1O0.00"), None);
        assert_eq!(parse_statement_amount("12abc3"), None);
        assert_eq!(parse_statement_amount("100.00 XX"), None);
        assert_eq!(parse_statement_amount("1.2.3"), None);
    }

    #[test]
    fn test_debit_marker_becomes_debit_line() {
        let csv = "Date,Description,Amount\n2025-03-01,Card fee,12.00 DR\n";

        let parsed = parse_statement(csv.as_bytes()).unwrap();

        assert_eq!(parsed.lines[0].amount, Decimal::new(-1200, 2));
        assert_eq!(
            BankTransactionType::from_amount(parsed.lines[0].amount),
            BankTransactionType::Debit
        );
    }

    #[test]
    fn test_line_numbers_count_blank_lines() {
        let csv = "Date,Description,Amount\n\n2025-03-01,Deposit,50.00\nbad,Deposit,1.00\n";

        let parsed = parse_statement(csv.as_bytes()).unwrap();

        assert_eq!(parsed.lines[0].line, 3);
        let skipped: Vec<usize> = parsed.skipped.iter().map(|s| s.line).collect();
        assert_eq!(skipped, vec![4]);
    }

    #[test]
    fn test_line_numbers_follow_multiline_fields() {
        let csv = "Date,Description,Amount\n\
                   2025-03-01,\"Transfer\nref 991\",50.00\n\
                   \n\
                   bad,Fee,1.00\n";

        let parsed = parse_statement(csv.as_bytes()).unwrap();

        assert_eq!(parsed.lines[0].line, 2);
        assert_eq!(parsed.lines[0].description, "Transfer\nref 991");
        let skipped: Vec<usize> = parsed.skipped.iter().map(|s| s.line).collect();
        assert_eq!(skipped, vec![5]);
    }

    #[test]
    fn test_parse_statement_any_column_order() {
        let csv = "amount,DATE,Balance,Description\n\
                   120.00,2025-03-01,1120.00,Card settlement\n\
                   -15.00,02/03/2025,1105.00,Bank fee\n";

        let parsed = parse_statement(csv.as_bytes()).unwrap();

        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[1].transaction_date, date(2025, 3, 2));
        assert_eq!(parsed.lines[1].amount, Decimal::new(-1500, 2));
        assert_eq!(parsed.lines[1].balance_after, Some(Decimal::new(110500, 2)));
        assert_eq!(parsed.lines[1].description, "Bank fee");
    }

    #[test]
    fn test_bad_rows_are_skipped_with_line_numbers() {
        let csv = "Date,Description,Amount,Balance\n\
                   2025-03-01,Deposit,50.00,\n\
                   not-a-date,Deposit,50.00,\n\
                   2025-03-03,,10.00,\n\
                   2025-03-04,Refund,abc,\n";

        let parsed = parse_statement(csv.as_bytes()).unwrap();

        assert_eq!(parsed.lines.len(), 1);
        assert_eq!(parsed.lines[0].balance_after, None);
        let skipped: Vec<usize> = parsed.skipped.iter().map(|s| s.line).collect();
        assert_eq!(skipped, vec![3, 4, 5]);
        assert!(parsed.skipped[0].reason.contains("invalid date"));
    }

    #[test]
    fn test_missing_amount_column_rejected() {
        let csv = "Date,Description,Balance\n2025-03-01,Deposit,50.00\n";
        assert!(matches!(
            parse_statement(csv.as_bytes()),
            Err(AppError::Validation { ref field, .. }) if field == "file"
        ));
    }

    #[test]
    fn test_csv_upload_detection() {
        assert!(is_csv_upload(Some("march.CSV"), None));
        assert!(is_csv_upload(None, Some("text/csv; charset=utf-8")));
        assert!(!is_csv_upload(Some("march.xlsx"), Some("text/csv")));
        assert!(!is_csv_upload(None, None));
    }
}
