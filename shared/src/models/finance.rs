//! Finance reconciliation models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::string_enum;

/// Kind of money account tracked by the back-office
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    CashDrawer,
    CreditCard,
}

impl AccountType {
    pub const ALL: [AccountType; 4] = [
        AccountType::Checking,
        AccountType::Savings,
        AccountType::CashDrawer,
        AccountType::CreditCard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
            AccountType::CashDrawer => "cash_drawer",
            AccountType::CreditCard => "credit_card",
        }
    }
}

string_enum!(AccountType, "account type");

/// Status of a reconciliation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Draft,
    InProgress,
    Completed,
    Cancelled,
}

impl ReconciliationStatus {
    pub const ALL: [ReconciliationStatus; 4] = [
        ReconciliationStatus::Draft,
        ReconciliationStatus::InProgress,
        ReconciliationStatus::Completed,
        ReconciliationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Draft => "draft",
            ReconciliationStatus::InProgress => "in_progress",
            ReconciliationStatus::Completed => "completed",
            ReconciliationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationStatus::Completed | ReconciliationStatus::Cancelled
        )
    }

    /// Whether statement lines, matches and discrepancies may still change
    pub fn accepts_changes(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: ReconciliationStatus) -> bool {
        use ReconciliationStatus::*;
        matches!(
            (self, next),
            (Draft, InProgress) | (InProgress, Completed) | (Draft, Cancelled) | (InProgress, Cancelled)
        )
    }
}

string_enum!(ReconciliationStatus, "reconciliation status");

/// Direction of a bank statement line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankTransactionType {
    Credit,
    Debit,
}

impl BankTransactionType {
    pub const ALL: [BankTransactionType; 2] = [BankTransactionType::Credit, BankTransactionType::Debit];

    pub fn as_str(&self) -> &'static str {
        match self {
            BankTransactionType::Credit => "credit",
            BankTransactionType::Debit => "debit",
        }
    }

    /// Money in is a credit, money out a debit
    pub fn from_amount(amount: Decimal) -> Self {
        if amount < Decimal::ZERO {
            BankTransactionType::Debit
        } else {
            BankTransactionType::Credit
        }
    }
}

string_enum!(BankTransactionType, "bank transaction type");

/// How a bank line was linked to a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Manual,
    Partial,
    Adjustment,
}

impl MatchType {
    pub const ALL: [MatchType; 3] = [MatchType::Manual, MatchType::Partial, MatchType::Adjustment];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Manual => "manual",
            MatchType::Partial => "partial",
            MatchType::Adjustment => "adjustment",
        }
    }
}

string_enum!(MatchType, "match type");

/// Category of an unexplained reconciliation difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    MissingInBank,
    MissingInPos,
    AmountMismatch,
    BankFee,
    Other,
}

impl DiscrepancyType {
    pub const ALL: [DiscrepancyType; 5] = [
        DiscrepancyType::MissingInBank,
        DiscrepancyType::MissingInPos,
        DiscrepancyType::AmountMismatch,
        DiscrepancyType::BankFee,
        DiscrepancyType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyType::MissingInBank => "missing_in_bank",
            DiscrepancyType::MissingInPos => "missing_in_pos",
            DiscrepancyType::AmountMismatch => "amount_mismatch",
            DiscrepancyType::BankFee => "bank_fee",
            DiscrepancyType::Other => "other",
        }
    }
}

string_enum!(DiscrepancyType, "discrepancy type");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    Open,
    Resolved,
}

impl DiscrepancyStatus {
    pub const ALL: [DiscrepancyStatus; 2] = [DiscrepancyStatus::Open, DiscrepancyStatus::Resolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyStatus::Open => "open",
            DiscrepancyStatus::Resolved => "resolved",
        }
    }
}

string_enum!(DiscrepancyStatus, "discrepancy status");

/// Expected closing balance: the opening balance plus every matched POS amount
pub fn expected_balance<I>(opening_balance: Decimal, match_amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    opening_balance + match_amounts.into_iter().sum::<Decimal>()
}

/// Statement balance minus expected balance; zero until a statement balance is known
pub fn balance_difference(closing_balance: Option<Decimal>, expected_balance: Decimal) -> Decimal {
    closing_balance
        .map(|closing| closing - expected_balance)
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciliation_transitions() {
        use ReconciliationStatus::*;
        assert!(Draft.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!Draft.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Cancelled.can_transition_to(Draft));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_terminal_statuses_reject_changes() {
        assert!(ReconciliationStatus::Draft.accepts_changes());
        assert!(ReconciliationStatus::InProgress.accepts_changes());
        assert!(!ReconciliationStatus::Completed.accepts_changes());
        assert!(!ReconciliationStatus::Cancelled.accepts_changes());
    }

    #[test]
    fn test_transaction_type_from_amount() {
        assert_eq!(
            BankTransactionType::from_amount(Decimal::new(-1500, 2)),
            BankTransactionType::Debit
        );
        assert_eq!(
            BankTransactionType::from_amount(Decimal::new(1500, 2)),
            BankTransactionType::Credit
        );
    }

    #[test]
    fn test_expected_balance_and_difference() {
        let expected = expected_balance(
            Decimal::from(1000),
            vec![Decimal::new(2550, 2), Decimal::new(7450, 2)],
        );
        assert_eq!(expected, Decimal::from(1100));
        assert_eq!(
            balance_difference(Some(Decimal::from(1090)), expected),
            Decimal::from(-10)
        );
        assert_eq!(balance_difference(None, expected), Decimal::ZERO);
    }

    #[test]
    fn test_account_type_parsing() {
        assert_eq!(
            "cash_drawer".parse::<AccountType>().unwrap(),
            AccountType::CashDrawer
        );
        assert!("brokerage".parse::<AccountType>().is_err());
    }
}
